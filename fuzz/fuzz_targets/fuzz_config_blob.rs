//! Fuzz target: stored configuration decoding
//!
//! Feeds arbitrary bytes through both configuration readers (postcard blob
//! from the settings store, JSON file on host) and checks that neither
//! panics and that anything accepted by `validate` survives a re-encode.
//!
//! cargo fuzz run fuzz_config_blob

#![no_main]

use libfuzzer_sys::fuzz_target;
use lbskit::config::SystemConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = postcard::from_bytes::<SystemConfig>(data) {
        if config.validate().is_ok() {
            let bytes = postcard::to_allocvec(&config).expect("valid config encodes");
            let back: SystemConfig = postcard::from_bytes(&bytes).expect("re-decodes");
            assert_eq!(back, config);
        }
    }

    let _ = SystemConfig::from_json(data);
});
