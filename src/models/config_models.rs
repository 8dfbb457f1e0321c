use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Images {
    pub python3: String,
    pub cpp: String,
    pub java: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sandbox {
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    pub images: Images,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatBackend {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Heartbeat {
    pub backend: HeartbeatBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sweeper {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Logging {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    pub sandbox: Sandbox,
    pub heartbeat: Heartbeat,
    pub database: Database,
    pub sweeper: Sweeper,
    #[serde(default)]
    pub logging: Logging,
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}
