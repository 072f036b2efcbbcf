use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{rdata, RData, Record, RecordType};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Etapa consultada antes del cache y de la red.
pub trait HostsLookup: Send + Sync {
    fn lookup(&self, query: &Query) -> Option<Message>;
}

/// Por defecto no hay tabla de hosts: nunca responde.
pub struct NoHosts;

impl HostsLookup for NoHosts {
    fn lookup(&self, _query: &Query) -> Option<Message> {
        None
    }
}

/// Tabla estática nombre → IPv4; sólo contesta consultas A.
pub struct StaticHosts {
    records: HashMap<String, Ipv4Addr>,
    ttl: u32,
}

impl StaticHosts {
    pub fn new(entries: impl IntoIterator<Item = (String, Ipv4Addr)>) -> Self {
        let records = entries
            .into_iter()
            .map(|(name, ip)| (normalize(&name), ip))
            .collect();
        Self { records, ttl: 300 }
    }
}

fn normalize(name: &str) -> String {
    let mut n = name.trim().to_ascii_lowercase();
    if !n.ends_with('.') {
        n.push('.');
    }
    n
}

impl HostsLookup for StaticHosts {
    fn lookup(&self, query: &Query) -> Option<Message> {
        if query.query_type() != RecordType::A {
            return None;
        }
        let key = query.name().to_ascii().to_ascii_lowercase();
        let ip = *self.records.get(&key)?;

        let mut msg = Message::new();
        msg.set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_response_code(ResponseCode::NoError)
            .set_recursion_available(true);
        msg.add_query(query.clone());
        msg.add_answer(Record::from_rdata(
            query.name().clone(),
            self.ttl,
            RData::A(rdata::A(ip)),
        ));
        Some(msg)
    }
}
