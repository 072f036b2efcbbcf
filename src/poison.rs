use crate::cache::VerdictCache;
use crate::geoip::RegionOracle;
use hickory_proto::op::Message;
use hickory_proto::rr::RData;
use std::sync::Arc;

/// Heurística de envenenamiento sobre las respuestas del upstream primario.
///
/// El ataque modelado inyecta registros A fabricados: una respuesta con A
/// se juzga por la geolocalización de sus direcciones, y el veredicto queda
/// memorizado por nombre. Una respuesta sin A (AAAA, MX, TXT...) no puede
/// juzgarse sola y hereda el último veredicto conocido del nombre.
#[derive(Clone)]
pub struct PoisonFilter {
    oracle: Arc<dyn RegionOracle>,
    verdicts: VerdictCache,
}

impl PoisonFilter {
    pub fn new(oracle: Arc<dyn RegionOracle>, verdicts: VerdictCache) -> Self {
        Self { oracle, verdicts }
    }

    pub fn verdicts(&self) -> &VerdictCache {
        &self.verdicts
    }

    /// `qname` es el FQDN canónico en minúsculas de la consulta original.
    pub fn is_polluted(&self, reply: &Message, qname: &str) -> bool {
        let mut saw_a = false;
        let mut regional = false;

        let records = reply
            .answers()
            .iter()
            .chain(reply.name_servers().iter())
            .chain(reply.additionals().iter());

        for record in records {
            if let RData::A(a) = record.data() {
                saw_a = true;
                if self.oracle.is_regional(a.0) {
                    regional = true;
                    break;
                }
            }
        }

        if saw_a {
            self.verdicts.record(qname, regional);
            return !regional;
        }

        // sin A no hay evidencia directa: heredamos el veredicto memorizado
        match self.verdicts.verdict(qname) {
            Some(was_regional) => !was_regional,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode, ResponseCode};
    use hickory_proto::rr::{rdata, Name, Record};
    use std::net::Ipv4Addr;

    struct FixedOracle(Vec<Ipv4Addr>);

    impl RegionOracle for FixedOracle {
        fn is_regional(&self, ip: Ipv4Addr) -> bool {
            self.0.contains(&ip)
        }
    }

    fn filter(regional: &[&str]) -> PoisonFilter {
        let ips = regional.iter().map(|s| s.parse().unwrap()).collect();
        PoisonFilter::new(Arc::new(FixedOracle(ips)), VerdictCache::new(16))
    }

    fn a_record(name: &str, ip: &str) -> Record {
        Record::from_rdata(
            Name::from_ascii(name).unwrap(),
            300,
            RData::A(rdata::A(ip.parse().unwrap())),
        )
    }

    fn empty_reply() -> Message {
        let mut msg = Message::new();
        msg.set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_response_code(ResponseCode::NoError);
        msg
    }

    #[test]
    fn regional_answer_is_clean_and_remembered() {
        let filter = filter(&["110.242.68.3"]);
        let mut reply = empty_reply();
        reply.add_answer(a_record("baidu.com.", "110.242.68.3"));

        assert!(!filter.is_polluted(&reply, "baidu.com."));
        assert_eq!(filter.verdicts().verdict("baidu.com."), Some(true));
    }

    #[test]
    fn foreign_only_answer_is_polluted_and_remembered() {
        let filter = filter(&["110.242.68.3"]);
        let mut reply = empty_reply();
        reply.add_answer(a_record("google.com.", "203.0.113.1"));

        assert!(filter.is_polluted(&reply, "google.com."));
        assert_eq!(filter.verdicts().verdict("google.com."), Some(false));
    }

    #[test]
    fn one_regional_among_foreign_is_enough() {
        let filter = filter(&["110.242.68.3"]);
        let mut reply = empty_reply();
        reply.add_answer(a_record("baidu.com.", "1.2.3.4"));
        reply.add_answer(a_record("baidu.com.", "110.242.68.3"));

        assert!(!filter.is_polluted(&reply, "baidu.com."));
    }

    #[test]
    fn a_records_in_authority_and_additional_count_too() {
        let filter = filter(&["110.242.68.3"]);
        let mut reply = empty_reply();
        reply.add_additional(a_record("ns.baidu.com.", "110.242.68.3"));

        assert!(!filter.is_polluted(&reply, "baidu.com."));
        assert_eq!(filter.verdicts().verdict("baidu.com."), Some(true));
    }

    #[test]
    fn non_a_reply_inherits_the_last_verdict() {
        let filter = filter(&["110.242.68.3"]);
        filter.verdicts().record("baidu.com.", true);
        filter.verdicts().record("google.com.", false);

        let reply = empty_reply();
        assert!(!filter.is_polluted(&reply, "baidu.com."));
        assert!(filter.is_polluted(&reply, "google.com."));
    }

    #[test]
    fn non_a_reply_without_verdict_trusts_the_upstream() {
        let filter = filter(&[]);
        let reply = empty_reply();
        assert!(!filter.is_polluted(&reply, "unseen.example."));
    }

    #[test]
    fn non_a_reply_does_not_touch_the_verdict() {
        let filter = filter(&[]);
        let reply = empty_reply();
        let _ = filter.is_polluted(&reply, "unseen.example.");
        assert_eq!(filter.verdicts().verdict("unseen.example."), None);
    }
}
