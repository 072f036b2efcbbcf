use crate::config::CacheConfig;
use hickory_proto::op::{Message, Query, ResponseCode};
use hickory_proto::rr::Record;
use hickory_proto::xfer::Protocol;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Clave de cache: `nombre_qtype_(RD|NORD)_transporte`.
/// El transporte forma parte de la clave: una respuesta UDP (truncable)
/// nunca se sirve a una consulta TCP ni al revés.
pub fn fingerprint(query: &Query, rd: bool, transport: Protocol) -> String {
    format!(
        "{}_{}_{}_{}",
        query.name().to_ascii().to_ascii_lowercase(),
        query.query_type(),
        if rd { "RD" } else { "NORD" },
        transport_label(transport)
    )
}

pub fn transport_label(transport: Protocol) -> &'static str {
    match transport {
        Protocol::Udp => "udp",
        Protocol::Tcp => "tcp",
        _ => "other",
    }
}

struct StoredReply {
    // snapshot inmutable; fetch devuelve siempre una copia
    message: Message,
    stored_at: Instant,
}

pub struct CacheHit {
    pub message: Message,
    /// Algún TTL hubiera expirado y fue clampeado al piso.
    pub stale: bool,
}

#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<Mutex<LruCache<String, StoredReply>>>,
    min_ttl: u32,
}

impl ResponseCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        let cap = NonZeroUsize::new(cfg.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(cap))),
            min_ttl: cfg.min_ttl,
        }
    }

    /// Copia profunda con decay de TTL aplicado. `stale` pide un refresh.
    pub fn fetch(&self, key: &str) -> Option<CacheHit> {
        let (mut message, elapsed) = {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            let entry = entries.get(key)?;
            let elapsed = entry.stored_at.elapsed().as_secs() as u32;
            (entry.message.clone(), elapsed)
        };

        let mut stale = false;

        let mut answers = message.take_answers();
        stale |= decay_records(&mut answers, elapsed, self.min_ttl);
        message.insert_answers(answers);

        let mut authority = message.take_name_servers();
        stale |= decay_records(&mut authority, elapsed, self.min_ttl);
        message.insert_name_servers(authority);

        let mut additionals = message.take_additionals();
        stale |= decay_records(&mut additionals, elapsed, self.min_ttl);
        message.insert_additionals(additionals);

        Some(CacheHit { message, stale })
    }

    /// Sólo se guardan respuestas NOERROR.
    pub fn store(&self, key: String, reply: &Message) {
        if reply.response_code() != ResponseCode::NoError {
            return;
        }
        let snapshot = StoredReply {
            message: reply.clone(),
            stored_at: Instant::now(),
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .put(key, snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decay_records(records: &mut [Record], elapsed: u32, floor: u32) -> bool {
    let mut clamped = false;
    for record in records {
        if record.ttl() <= elapsed {
            record.set_ttl(floor);
            clamped = true;
        } else {
            let ttl = record.ttl();
            record.set_ttl(ttl - elapsed);
        }
    }
    clamped
}

/// Último veredicto observado por nombre: "la última respuesta A fue regional".
#[derive(Clone)]
pub struct VerdictCache {
    entries: Arc<Mutex<LruCache<String, bool>>>,
}

impl VerdictCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn record(&self, name: &str, regional: bool) {
        self.entries
            .lock()
            .expect("verdict lock poisoned")
            .put(name.to_string(), regional);
    }

    pub fn verdict(&self, name: &str) -> Option<bool> {
        self.entries
            .lock()
            .expect("verdict lock poisoned")
            .get(name)
            .copied()
    }
}
