//! Compiled-in defaults, generated by build.rs (see `FF_CONFIG_RS`)

include!(concat!(env!("OUT_DIR"), "/ff_merged_config.rs"));
