use serde::Deserialize;

fn d_listen() -> String {
    "127.0.0.1:53".to_string()
}
fn d_primary() -> String {
    // resolvedor doméstico rápido
    "114.114.114.114".to_string()
}
fn d_secondary() -> String {
    // resolvedor limpio, fuera de la región
    "8.8.8.8".to_string()
}
fn d_capacity() -> usize {
    4096
}
fn d_min_ttl() -> u32 {
    60
}
fn d_timeout_ms() -> u64 {
    2000
}
fn d_region() -> String {
    "CN".to_string()
}
fn d_mmdb_path() -> String {
    "GeoLite2-Country.mmdb".to_string()
}
fn d_cidr_url() -> String {
    "https://raw.githubusercontent.com/kiddin9/china_ip_list/main/china_ip_list.txt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Un solo endpoint; UDP y TCP se bindean sobre el mismo.
    #[serde(default = "d_listen")]
    pub listen_addr: String,

    #[serde(default = "d_primary")]
    pub primary_dns: String,

    #[serde(default = "d_secondary")]
    pub secondary_dns: String,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub geoip: GeoIpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_capacity")]
    pub capacity: usize,

    #[serde(default = "d_capacity")]
    pub verdict_capacity: usize,

    /// Piso de TTL al servir desde cache.
    #[serde(default = "d_min_ttl")]
    pub min_ttl: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: d_capacity(),
            verdict_capacity: d_capacity(),
            min_ttl: d_min_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Deadline global de la carrera contra los dos upstreams.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: d_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoIpMode {
    Cidr,
    Mmdb,
}

fn d_geoip_mode() -> GeoIpMode {
    GeoIpMode::Cidr
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default = "d_geoip_mode")]
    pub mode: GeoIpMode,

    #[serde(default = "d_region")]
    pub region: String,

    #[serde(default = "d_mmdb_path")]
    pub mmdb_path: String,

    #[serde(default = "d_cidr_url")]
    pub cidr_url: String,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            mode: d_geoip_mode(),
            region: d_region(),
            mmdb_path: d_mmdb_path(),
            cidr_url: d_cidr_url(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: d_listen(),
            primary_dns: d_primary(),
            secondary_dns: d_secondary(),
            cache: CacheConfig::default(),
            upstream: UpstreamConfig::default(),
            geoip: GeoIpConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&s)?)
    }

    /// Completa puertos faltantes y acota la capacidad mínima.
    pub fn normalized(mut self) -> Self {
        self.primary_dns = ensure_port(&self.primary_dns);
        self.secondary_dns = ensure_port(&self.secondary_dns);
        self.cache.capacity = self.cache.capacity.max(1);
        self.cache.verdict_capacity = self.cache.verdict_capacity.max(1);
        self
    }
}

pub fn ensure_port(endpoint: &str) -> String {
    if endpoint.contains(':') {
        endpoint.to_string()
    } else {
        format!("{endpoint}:53")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:53");
        assert_eq!(cfg.cache.min_ttl, 60);
        assert_eq!(cfg.upstream.timeout_ms, 2000);
        assert_eq!(cfg.geoip.mode, GeoIpMode::Cidr);
        assert_eq!(cfg.geoip.region, "CN");
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
primary_dns = "119.29.29.29"

[cache]
capacity = 16

[geoip]
mode = "mmdb"
"#,
        )
        .unwrap();
        assert_eq!(cfg.primary_dns, "119.29.29.29");
        assert_eq!(cfg.cache.capacity, 16);
        assert_eq!(cfg.cache.verdict_capacity, 4096);
        assert_eq!(cfg.geoip.mode, GeoIpMode::Mmdb);
    }

    #[test]
    fn normalized_appends_default_port() {
        let cfg = AppConfig {
            primary_dns: "114.114.114.114".into(),
            secondary_dns: "8.8.8.8:5353".into(),
            ..AppConfig::default()
        }
        .normalized();
        assert_eq!(cfg.primary_dns, "114.114.114.114:53");
        assert_eq!(cfg.secondary_dns, "8.8.8.8:5353");
    }

    #[test]
    fn normalized_clamps_capacity() {
        let mut cfg = AppConfig::default();
        cfg.cache.capacity = 0;
        let cfg = cfg.normalized();
        assert_eq!(cfg.cache.capacity, 1);
    }

    #[test]
    fn load_reads_a_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splitter.toml");
        std::fs::write(&path, "listen_addr = \"127.0.0.1:5353\"\n").unwrap();
        let cfg = AppConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:5353");
    }
}
