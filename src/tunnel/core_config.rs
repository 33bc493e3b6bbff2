//! Per-worker tunnel core configuration file.

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::tunnel::WorkerSpec;

/// Core configuration for `spec`, with `data_dir` as its data root.
///
/// Keys from `tunnel_core.extra` are copied first, so the port wiring below
/// always wins.
pub fn render(spec: &WorkerSpec, data_dir: &Path) -> Value {
    let mut doc: Map<String, Value> = spec.core.extra.clone();

    let wiring = json!({
        "LocalHttpProxyPort": spec.listen_port,
        "UpstreamProxyUrl": format!("http://127.0.0.1:{}", spec.egress_port),
        "EgressRegion": spec.core.region,
        "TunnelPoolSize": spec.core.tunnel,
        "ConnectionWorkerPoolSize": spec.core.tunnel_workers,
        "DataRootDirectory": data_dir.display().to_string(),
        "EmitBytesTransferred": true,
    });
    if let Value::Object(wiring) = wiring {
        doc.extend(wiring);
    }

    Value::Object(doc)
}
