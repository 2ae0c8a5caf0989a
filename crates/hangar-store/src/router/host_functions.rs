//! Extism host functions exposing the [`HostContext`] to in-process guests.
//!
//! | Function | Inputs | Output |
//! |----------|--------|--------|
//! | `hangar_launch_capability` | id | reply |
//! | `hangar_query_documents` | text | reply with `[DocumentMatch]` |
//! | `hangar_list_documents` | - | reply with `[filename]` |
//! | `hangar_add_document` | content, filename | reply |
//! | `hangar_log` | level, message | - |
//!
//! A reply is a JSON object: `{"ok": <value>}` or `{"error": "<message>"}`.
//! Host calls are async; they are bridged with `Handle::block_on`, which
//! requires the multi-threaded tokio runtime.

use std::sync::Arc;

use extism::{CurrentPlugin, Error, PTR, UserData, Val};
use hangar_core::{CapabilityId, HostContext, HostResult};
use serde::Serialize;

/// State shared by every host function of one module instance.
pub(super) struct HostState {
    pub(super) capability: CapabilityId,
    pub(super) host: Arc<dyn HostContext>,
    pub(super) runtime_handle: tokio::runtime::Handle,
}

fn reply<T: Serialize>(result: HostResult<T>) -> String {
    let value = match result {
        Ok(v) => serde_json::json!({ "ok": v }),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };
    value.to_string()
}

/// Clone what a host call needs out of the shared state.
fn context(
    user_data: &UserData<HostState>,
) -> Result<(CapabilityId, Arc<dyn HostContext>, tokio::runtime::Handle), Error> {
    let ud = user_data.get()?;
    let state = ud
        .lock()
        .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))?;
    Ok((
        state.capability.clone(),
        Arc::clone(&state.host),
        state.runtime_handle.clone(),
    ))
}

fn write_reply(plugin: &mut CurrentPlugin, outputs: &mut [Val], body: &str) -> Result<(), Error> {
    let mem = plugin.memory_new(body)?;
    outputs[0] = plugin.memory_to_val(mem);
    Ok(())
}

// ---------------------------------------------------------------------------
// hangar_launch_capability(id) -> reply
// ---------------------------------------------------------------------------

#[allow(clippy::needless_pass_by_value)] // Signature required by Extism callback API
fn hangar_launch_capability_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let target: String = plugin.memory_get_val(&inputs[0])?;
    let (capability, host, handle) = context(&user_data)?;

    tracing::debug!(capability = %capability, %target, "Guest launching capability");
    let result = handle.block_on(async { host.launch_capability(&target).await });
    write_reply(plugin, outputs, &reply(result))
}

// ---------------------------------------------------------------------------
// hangar_query_documents(text) -> reply
// ---------------------------------------------------------------------------

#[allow(clippy::needless_pass_by_value)]
fn hangar_query_documents_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let text: String = plugin.memory_get_val(&inputs[0])?;
    let (_, host, handle) = context(&user_data)?;

    let result = handle.block_on(async { host.query_documents(&text).await });
    write_reply(plugin, outputs, &reply(result))
}

// ---------------------------------------------------------------------------
// hangar_list_documents() -> reply
// ---------------------------------------------------------------------------

#[allow(clippy::needless_pass_by_value)]
fn hangar_list_documents_impl(
    plugin: &mut CurrentPlugin,
    _inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let (_, host, handle) = context(&user_data)?;

    let result = handle.block_on(async { host.list_documents().await });
    write_reply(plugin, outputs, &reply(result))
}

// ---------------------------------------------------------------------------
// hangar_add_document(content, filename) -> reply
// ---------------------------------------------------------------------------

#[allow(clippy::needless_pass_by_value)]
fn hangar_add_document_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let content: String = plugin.memory_get_val(&inputs[0])?;
    let filename: String = plugin.memory_get_val(&inputs[1])?;
    let (capability, host, handle) = context(&user_data)?;

    let result = handle.block_on(async {
        host.add_document(&content, &filename).await?;
        host.document_uploaded(&filename).await;
        Ok(true)
    });
    if result.is_ok() {
        tracing::info!(capability = %capability, %filename, "Guest added document");
    }
    write_reply(plugin, outputs, &reply(result))
}

// ---------------------------------------------------------------------------
// hangar_log(level, message)
// ---------------------------------------------------------------------------

#[allow(clippy::needless_pass_by_value)]
fn hangar_log_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let level: String = plugin.memory_get_val(&inputs[0])?;
    let message: String = plugin.memory_get_val(&inputs[1])?;
    let (capability, _, _) = context(&user_data)?;

    match level.to_ascii_lowercase().as_str() {
        "trace" => tracing::trace!(capability = %capability, "{message}"),
        "debug" => tracing::debug!(capability = %capability, "{message}"),
        "warn" | "warning" => tracing::warn!(capability = %capability, "{message}"),
        "error" => tracing::error!(capability = %capability, "{message}"),
        _ => tracing::info!(capability = %capability, "{message}"),
    }
    Ok(())
}

/// Register every host function on `builder`.
pub(super) fn register_host_functions(
    builder: extism::PluginBuilder,
    user_data: UserData<HostState>,
) -> extism::PluginBuilder {
    builder
        .with_function(
            "hangar_launch_capability",
            [PTR],
            [PTR],
            user_data.clone(),
            hangar_launch_capability_impl,
        )
        .with_function(
            "hangar_query_documents",
            [PTR],
            [PTR],
            user_data.clone(),
            hangar_query_documents_impl,
        )
        .with_function(
            "hangar_list_documents",
            [],
            [PTR],
            user_data.clone(),
            hangar_list_documents_impl,
        )
        .with_function(
            "hangar_add_document",
            [PTR, PTR],
            [PTR],
            user_data.clone(),
            hangar_add_document_impl,
        )
        .with_function("hangar_log", [PTR, PTR], [], user_data, hangar_log_impl)
}
