use std::collections::BTreeMap;

use dodgeball_protocol::Fingerprint;
use dodgeball_protocol::FingerprintSource;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;

/// The SDK's own fingerprint of the host it runs on.
pub(crate) fn host_fingerprint() -> Fingerprint {
    let info = os_info::get();
    let mut fingerprint = Fingerprint::new(FingerprintSource::Dodgeball);
    let props = &mut fingerprint.props;
    props.insert("osType".to_string(), Value::String(info.os_type().to_string()));
    props.insert("osVersion".to_string(), Value::String(info.version().to_string()));
    props.insert("bitness".to_string(), Value::String(info.bitness().to_string()));
    if let Some(arch) = info.architecture() {
        props.insert("architecture".to_string(), Value::String(arch.to_string()));
    }
    props.insert("sdkVersion".to_string(), Value::String(env!("CARGO_PKG_VERSION").to_string()));
    fingerprint.hash = Some(hash_props(&fingerprint.props));
    fingerprint
}

/// Hex SHA-256 over the props serialised with sorted top-level keys.
pub(crate) fn hash_props(props: &serde_json::Map<String, Value>) -> String {
    let sorted: BTreeMap<&String, &Value> = props.iter().collect();
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}
