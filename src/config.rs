//! Server configuration.
//!
//! Configuration is read from a TOML file and deserialized with serde. A
//! missing or unparseable file falls back to [`Config::default`] so the
//! server always comes up with something sensible.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

use crate::http::HttpMethod;

pub const METHOD_GET: u8 = 1 << 0;
pub const METHOD_POST: u8 = 1 << 1;
pub const METHOD_PUT: u8 = 1 << 2;
pub const METHOD_DELETE: u8 = 1 << 3;
pub const METHOD_HEAD: u8 = 1 << 4;
pub const METHOD_ALL: u8 = METHOD_GET | METHOD_POST | METHOD_PUT | METHOD_DELETE | METHOD_HEAD;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_port: u16,
    pub max_request_size: usize,
    pub message_buffer_size: usize,
    /// File extension (without dot) to interpreter binary.
    pub cgi_interpreters: HashMap<String, String>,
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut cgi_interpreters = HashMap::new();
        cgi_interpreters.insert("py".to_string(), "/usr/bin/python3".to_string());
        cgi_interpreters.insert("sh".to_string(), "/bin/sh".to_string());

        Self {
            default_port: 8080,
            max_request_size: 1024 * 1024, // 1 MB
            message_buffer_size: 4096,
            cgi_interpreters,
            servers: vec![ServerConfig::default()],
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                log::warn!("failed to read {path}: {err}; falling back to default config");
                return Config::default();
            }
        };

        match toml::from_str::<Config>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("failed to parse {path}: {err}; falling back to default config");
                Config::default()
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub server_names: Vec<String>,
    pub root: Option<String>,
    pub max_request_size: Option<usize>,
    /// Status code (as a string key, TOML keys are strings) to page path.
    pub error_pages: HashMap<String, String>,
    pub locations: HashMap<String, LocationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut locations = HashMap::new();
        locations.insert("/".to_string(), LocationConfig::default());
        Self {
            port: None,
            server_names: Vec::new(),
            root: Some("./www".to_string()),
            max_request_size: None,
            error_pages: HashMap::new(),
            locations,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub root: Option<String>,
    pub index: Option<String>,
    pub dir_listing: bool,
    pub allow_cgi: bool,
    #[serde(deserialize_with = "deserialize_methods")]
    pub allowed_methods: u8,
    pub max_request_size: Option<usize>,
    pub error_pages: HashMap<String, String>,
    pub redirect: Option<String>,
    pub upload_field: Option<String>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            root: None,
            index: None,
            dir_listing: false,
            allow_cgi: false,
            allowed_methods: METHOD_ALL,
            max_request_size: None,
            error_pages: HashMap::new(),
            redirect: None,
            upload_field: None,
        }
    }
}

impl LocationConfig {
    pub fn allows(&self, method: HttpMethod) -> bool {
        self.allowed_methods & method_flag(method) != 0
    }
}

pub fn method_flag(method: HttpMethod) -> u8 {
    match method {
        HttpMethod::Get => METHOD_GET,
        HttpMethod::Post => METHOD_POST,
        HttpMethod::Put => METHOD_PUT,
        HttpMethod::Delete => METHOD_DELETE,
        HttpMethod::Head => METHOD_HEAD,
    }
}

fn deserialize_methods<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    let mut mask = 0u8;
    for name in names {
        let method = HttpMethod::from_str(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown method: {name}")))?;
        mask |= method_flag(method);
    }
    Ok(mask)
}
