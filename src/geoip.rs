use crate::config::{GeoIpConfig, GeoIpMode};
use ipnet::Ipv4Net;
use maxminddb::geoip2;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("no pude abrir la base MMDB: {0}")]
    Mmdb(#[from] maxminddb::MaxMindDBError),

    #[error("descarga de la lista CIDR falló: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} al descargar la lista CIDR")]
    FetchStatus { status: u16 },

    #[error("la lista CIDR no aportó ningún rango usable")]
    EmptyCidrList,
}

/// ¿La IP pertenece a la región configurada?
/// Dos variantes intercambiables: base MaxMind o lista CIDR descargada.
pub trait RegionOracle: Send + Sync {
    fn is_regional(&self, ip: Ipv4Addr) -> bool;
}

pub struct MmdbOracle {
    reader: maxminddb::Reader<Vec<u8>>,
    region: String,
}

impl MmdbOracle {
    pub fn open(path: impl AsRef<Path>, region: &str) -> Result<Self, OracleError> {
        let reader = maxminddb::Reader::open_readfile(path)?;
        Ok(Self {
            reader,
            region: region.to_ascii_uppercase(),
        })
    }
}

impl RegionOracle for MmdbOracle {
    fn is_regional(&self, ip: Ipv4Addr) -> bool {
        match self.reader.lookup::<geoip2::Country>(IpAddr::V4(ip)) {
            Ok(rec) => rec.country.and_then(|c| c.iso_code) == Some(self.region.as_str()),
            Err(e) => {
                tracing::error!(ip = %ip, error = %e, "lookup MMDB falló; trato la IP como no regional");
                false
            }
        }
    }
}

/// Intervalos `[inicio, fin]` inclusivos sobre u32, ordenados por inicio.
/// Se construye una sola vez al arranque; después es de sólo lectura.
#[derive(Debug, Clone, Default)]
pub struct CidrIndex {
    ranges: Vec<(u32, u32)>,
}

impl CidrIndex {
    pub fn from_lines(text: &str) -> Self {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.parse::<Ipv4Net>() {
                Ok(net) => ranges.push((u32::from(net.network()), u32::from(net.broadcast()))),
                Err(e) => tracing::warn!(line, error = %e, "línea CIDR inválida, la salteo"),
            }
        }
        ranges.sort_unstable_by_key(|r| r.0);
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let v = u32::from(ip);
        let mut lo = 0usize;
        let mut hi = self.ranges.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (start, end) = self.ranges[mid];
            if v < start {
                hi = mid;
            } else if v > end {
                lo = mid + 1;
            } else {
                return true;
            }
        }
        false
    }
}

pub struct CidrOracle {
    index: CidrIndex,
}

impl CidrOracle {
    pub fn new(index: CidrIndex) -> Self {
        Self { index }
    }
}

impl RegionOracle for CidrOracle {
    fn is_regional(&self, ip: Ipv4Addr) -> bool {
        self.index.contains(ip)
    }
}

pub async fn fetch_cidr_index(url: &str) -> Result<CidrIndex, OracleError> {
    let client = reqwest::Client::builder()
        .user_agent("rust-dns-splitter/0.2")
        .build()?;

    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(OracleError::FetchStatus {
            status: resp.status().as_u16(),
        });
    }

    let body = resp.text().await?;
    let index = CidrIndex::from_lines(&body);
    if index.is_empty() {
        return Err(OracleError::EmptyCidrList);
    }
    Ok(index)
}

/// Sólo una variante queda activa por despliegue; el engine no distingue.
pub async fn build_oracle(cfg: &GeoIpConfig) -> Result<Arc<dyn RegionOracle>, OracleError> {
    match cfg.mode {
        GeoIpMode::Mmdb => Ok(Arc::new(MmdbOracle::open(&cfg.mmdb_path, &cfg.region)?)),
        GeoIpMode::Cidr => {
            let index = fetch_cidr_index(&cfg.cidr_url).await?;
            tracing::info!(ranges = index.len(), url = %cfg.cidr_url, "índice CIDR cargado");
            Ok(Arc::new(CidrOracle::new(index)))
        }
    }
}
