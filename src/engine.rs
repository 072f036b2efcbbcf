use crate::cache::{fingerprint, CacheHit, ResponseCache, VerdictCache};
use crate::config::AppConfig;
use crate::geoip::RegionOracle;
use crate::hosts::{HostsLookup, NoHosts};
use crate::poison::PoisonFilter;
use crate::upstream::UpstreamClient;
use dashmap::DashMap;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::xfer::Protocol;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// De dónde salió la respuesta servida; va al log por consulta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Hosts,
    Cache,
    Upstream(String),
    None,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Hosts => f.write_str("hosts"),
            Source::Cache => f.write_str("cache"),
            Source::Upstream(endpoint) => f.write_str(endpoint),
            Source::None => f.write_str("none"),
        }
    }
}

pub struct Resolved {
    pub message: Message,
    pub source: Source,
}

/// Orquesta la resolución: hosts → cache → carrera entre dos upstreams
/// con filtro de envenenamiento sobre el primario.
#[derive(Clone)]
pub struct ResolverEngine {
    primary: String,
    secondary: String,
    deadline: Duration,
    hosts: Arc<dyn HostsLookup>,
    responses: ResponseCache,
    filter: PoisonFilter,
    client: UpstreamClient,
    refreshing: Arc<DashMap<String, ()>>,
}

impl ResolverEngine {
    pub fn new(cfg: &AppConfig, oracle: Arc<dyn RegionOracle>) -> Self {
        let timeout = Duration::from_millis(cfg.upstream.timeout_ms);
        Self {
            primary: cfg.primary_dns.clone(),
            secondary: cfg.secondary_dns.clone(),
            deadline: timeout,
            hosts: Arc::new(NoHosts),
            responses: ResponseCache::new(&cfg.cache),
            filter: PoisonFilter::new(oracle, VerdictCache::new(cfg.cache.verdict_capacity)),
            client: UpstreamClient::new(timeout),
            refreshing: Arc::new(DashMap::new()),
        }
    }

    pub fn with_hosts(mut self, hosts: Arc<dyn HostsLookup>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn responses(&self) -> &ResponseCache {
        &self.responses
    }

    pub fn verdicts(&self) -> &VerdictCache {
        self.filter.verdicts()
    }

    /// Nunca falla hacia afuera: cualquier problema interno degrada a SERVFAIL.
    pub async fn resolve(&self, query: &Query, rd: bool, transport: Protocol) -> Resolved {
        if let Some(reply) = self.hosts.lookup(query) {
            return Resolved {
                message: reply,
                source: Source::Hosts,
            };
        }

        let key = fingerprint(query, rd, transport);

        if let Some(CacheHit { message, stale }) = self.responses.fetch(&key) {
            if stale {
                self.spawn_refresh(query.clone(), rd, transport, key);
            }
            return Resolved {
                message,
                source: Source::Cache,
            };
        }

        self.resolve_upstream(query, rd, transport, &key).await
    }

    async fn resolve_upstream(
        &self,
        query: &Query,
        rd: bool,
        transport: Protocol,
        key: &str,
    ) -> Resolved {
        let question = build_question(query, rd);
        let qname = query.name().to_ascii().to_ascii_lowercase();

        // un slot por upstream, con lugar para el resultado real y el null del timer
        let (primary_tx, mut primary_rx) = mpsc::channel::<Option<Message>>(2);
        let (secondary_tx, mut secondary_rx) = mpsc::channel::<Option<Message>>(2);

        {
            let client = self.client.clone();
            let filter = self.filter.clone();
            let endpoint = self.primary.clone();
            let question = question.clone();
            let qname = qname.clone();
            let tx = primary_tx.clone();
            tokio::spawn(async move {
                let outcome = match client.query(&question, &endpoint, transport).await {
                    Ok(reply)
                        if reply.response_code() == ResponseCode::NoError
                            && !filter.is_polluted(&reply, &qname) =>
                    {
                        Some(reply)
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::error!(upstream = %endpoint, error = %e, "falló el upstream primario");
                        None
                    }
                };
                let _ = tx.send(outcome).await;
            });
        }

        {
            // el secundario es confiable por configuración: no pasa por el filtro
            let client = self.client.clone();
            let endpoint = self.secondary.clone();
            let question = question.clone();
            let tx = secondary_tx.clone();
            tokio::spawn(async move {
                let outcome = match client.query(&question, &endpoint, transport).await {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        tracing::error!(upstream = %endpoint, error = %e, "falló el upstream secundario");
                        None
                    }
                };
                let _ = tx.send(outcome).await;
            });
        }

        {
            // timer: escribe null en ambos slots para garantizar respuesta
            // aunque los dos upstreams cuelguen
            let deadline = self.deadline;
            tokio::spawn(async move {
                sleep(deadline).await;
                let _ = primary_tx.send(None).await;
                let _ = secondary_tx.send(None).await;
            });
        }

        // el primario siempre gana si fue aceptado, aunque el secundario
        // haya llegado antes
        if let Some(reply) = primary_rx.recv().await.flatten() {
            self.responses.store(key.to_string(), &reply);
            return Resolved {
                message: reply,
                source: Source::Upstream(self.primary.clone()),
            };
        }

        if let Some(reply) = secondary_rx.recv().await.flatten() {
            self.responses.store(key.to_string(), &reply);
            return Resolved {
                message: reply,
                source: Source::Upstream(self.secondary.clone()),
            };
        }

        tracing::warn!(domain = %qname, "ningún upstream respondió antes del deadline");
        Resolved {
            message: servfail(query, rd),
            source: Source::None,
        }
    }

    /// Refresh desacoplado, con single-flight por fingerprint: servir dos
    /// veces una entrada vencida no dispara dos carreras.
    fn spawn_refresh(&self, query: Query, rd: bool, transport: Protocol, key: String) {
        if self.refreshing.insert(key.clone(), ()).is_some() {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            if let Some(reply) = engine.hosts.lookup(&query) {
                engine.responses.store(key.clone(), &reply);
            } else {
                let _ = engine.resolve_upstream(&query, rd, transport, &key).await;
            }
            engine.refreshing.remove(&key);
        });
    }
}

fn build_question(query: &Query, rd: bool) -> Message {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(rd);
    msg.add_query(query.clone());
    msg
}

fn servfail(query: &Query, rd: bool) -> Message {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_response_code(ResponseCode::ServFail)
        .set_recursion_desired(rd)
        .set_recursion_available(true);
    msg.add_query(query.clone());
    msg
}
