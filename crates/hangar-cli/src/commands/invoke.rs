//! Invoke command: send one message to a capability.

use std::time::Duration;

use anyhow::bail;
use hangar_core::{CapabilityId, CapabilityKind};
use hangar_store::{CapabilityStore, InvocationRequest, InvocationResponse};

use super::{OutputFormat, print_json};
use crate::theme::Theme;

/// Invoke `id` with `message`. Ctrl-C cancels the call and kills its
/// process.
pub(crate) async fn invoke(
    store: &CapabilityStore,
    kind: CapabilityKind,
    id: &CapabilityId,
    request: InvocationRequest,
    timeout: Option<Duration>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let call = async {
        match timeout {
            Some(t) => store.invoke_with_timeout(kind, id, &request, t).await,
            None => store.invoke(kind, id, &request).await,
        }
    };
    tokio::pin!(call);

    let finished: Option<InvocationResponse> = tokio::select! {
        resp = &mut call => Some(resp),
        _ = tokio::signal::ctrl_c() => None,
    };
    let response = match finished {
        Some(resp) => resp,
        None => {
            store.shutdown();
            call.await
        },
    };

    if format == OutputFormat::Json {
        print_json(&response)?;
    } else if response.is_ok() {
        println!("{}", response.text);
    } else {
        eprintln!("{}", Theme::error(&response.text));
    }

    if let Some(error) = response.error {
        bail!("invocation failed: {error}");
    }
    Ok(())
}
