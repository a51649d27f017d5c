use anyhow::{Context, Result};
use cdp_adapter::metrics as cdp_metrics;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        cdp_metrics::register_metrics(global_registry());
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Prometheus text exposition of every registered series.
pub fn render_metrics() -> Result<String> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&global_registry().gather(), &mut buffer)
        .context("Failed to encode prometheus metrics")?;
    String::from_utf8(buffer).context("Prometheus output was not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_names_bridge_series() {
        cdp_adapter::metrics::record_fragment("DRAIN");
        let text = render_metrics().unwrap();
        assert!(text.contains("pagebridge_fragments_total"));
    }
}
