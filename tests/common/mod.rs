use std::env;
use std::path::PathBuf;

use tributary::config::{parse_config, Settings};

pub const TEST_DATABASE: &str = "tributary_test";

/// Settings for a live three node cluster, hosts taken from TRIBUTARY_TEST_NODE{1,2,3}.
pub fn live_settings() -> &'static Settings {
    let yaml = format!(r#"
database: {}
user: ${{TRIBUTARY_TEST_USER:root}}
password: ${{TRIBUTARY_TEST_PASSWORD:?TRIBUTARY_TEST_PASSWORD is required for live tests}}
connect_attempts: 2
connect_backoff_millis: 200
nodes:
  - id: 1
    host: ${{TRIBUTARY_TEST_NODE1:127.0.0.1}}
    port: 3306
    role: replica-2006
  - id: 2
    host: ${{TRIBUTARY_TEST_NODE2:127.0.0.1}}
    port: 3307
    role: master
  - id: 3
    host: ${{TRIBUTARY_TEST_NODE3:127.0.0.1}}
    port: 3308
    role: replica-2007
"#, env::var("TRIBUTARY_TEST_DATABASE").unwrap_or_else(|_| TEST_DATABASE.to_string()));
    let conf = parse_config(&yaml, PathBuf::from("live.yaml")).expect("invalid live test config");
    Box::leak(Box::new(conf))
}
