//! Build script for ff-runtime
//!
//! Produces `OUT_DIR/ff_merged_config.rs`, the compiled-in scheduler
//! defaults:
//! 1. Start with library defaults
//! 2. If FF_CONFIG_RS names a file, read its `pub const` lines
//! 3. Known names override the defaults, unknown names produce a warning
//!
//! A user file only lists the values it wants to change.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "256 * 1024",
    },
    ConfigParam {
        name: "RUN_QUEUE_LIFO",
        rust_type: "bool",
        default_value: "false",
    },
    ConfigParam {
        name: "THREADPOOL_MAX_THREADS",
        rust_type: "usize",
        default_value: "16",
    },
    ConfigParam {
        name: "THREADPOOL_PARK_TIMEOUT_MS",
        rust_type: "u64",
        default_value: "1000",
    },
    ConfigParam {
        name: "FIBERPOOL_MAX_FIBERS",
        rust_type: "usize",
        default_value: "32",
    },
    ConfigParam {
        name: "FIBERPOOL_QUEUE_CAPACITY",
        rust_type: "usize",
        default_value: "1024",
    },
    ConfigParam {
        name: "TIMEOUT_SCAN_INTERVAL_MS",
        rust_type: "u64",
        default_value: "100",
    },
    ConfigParam {
        name: "PORT_CONCURRENCY",
        rust_type: "usize",
        default_value: "1",
    },
    ConfigParam {
        name: "DEBUG_LOGGING",
        rust_type: "bool",
        default_value: "false",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("ff_merged_config.rs");

    let mut config: BTreeMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let user_path = env::var("FF_CONFIG_RS").ok();
    if let Some(path) = &user_path {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(content) => {
                for unknown in parse_and_merge(&content, &mut config) {
                    println!("cargo:warning=Unknown ff config parameter: {}", unknown);
                }
                println!("cargo:warning=Using custom ff config: {}", path);
            }
            Err(e) => {
                println!("cargo:warning=Failed to read FF_CONFIG_RS ({}): {}", path, e);
            }
        }
    }
    println!("cargo:rerun-if-env-changed=FF_CONFIG_RS");

    let output = generate_config(&config, user_path.is_some());
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Merge `pub const NAME: TYPE = VALUE;` lines into `config`.
/// Returns the names that are not known parameters.
fn parse_and_merge(content: &str, config: &mut BTreeMap<&str, String>) -> Vec<String> {
    let mut unknown = Vec::new();
    for line in content.lines().map(str::trim) {
        if !line.starts_with("pub const ") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => unknown.push(name),
        }
    }
    unknown
}

fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();
    let colon = rest.find(':')?;
    let eq = rest.find('=')?;
    let semi = rest.rfind(';').unwrap_or(rest.len());
    if eq < colon || semi < eq {
        return None;
    }
    let name = rest[..colon].trim().to_string();
    let value = rest[eq + 1..semi].trim().to_string();
    Some((name, value))
}

fn generate_config(config: &BTreeMap<&str, String>, custom: bool) -> String {
    let mut output = String::from("// Generated by ff-runtime/build.rs\n");
    if custom {
        output.push_str("// Library defaults merged with FF_CONFIG_RS\n");
    }
    output.push('\n');
    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_line() {
        assert_eq!(
            parse_const_line("pub const STACK_SIZE: usize = 64 * 1024;"),
            Some(("STACK_SIZE".into(), "64 * 1024".into()))
        );
        assert_eq!(parse_const_line("pub const BROKEN usize 3;"), None);
    }

    #[test]
    fn test_parse_and_merge_reports_unknown() {
        let mut config: BTreeMap<&str, String> = BTreeMap::new();
        config.insert("RUN_QUEUE_LIFO", "false".into());
        let unknown = parse_and_merge(
            "// mine\npub const RUN_QUEUE_LIFO: bool = true;\npub const NUM_CPUS: usize = 2;\n",
            &mut config,
        );
        assert_eq!(config.get("RUN_QUEUE_LIFO"), Some(&"true".to_string()));
        assert_eq!(unknown, vec!["NUM_CPUS".to_string()]);
    }
}
