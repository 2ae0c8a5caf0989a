//! Hangar Store - install and run capability packages published in a
//! remote registry.
//!
//! The store discovers capabilities (agents, tool servers, applications)
//! through per-kind registries, mirrors only each capability's subtree of
//! its source repository, provisions an isolated dependency environment,
//! persists install/enable state, and invokes capabilities either
//! in-process (WebAssembly via Extism) or out-of-process (JSON over stdio).
//!
//! # Example
//!
//! ```rust,no_run
//! use hangar_config::Config;
//! use hangar_core::{CapabilityId, CapabilityKind, HangarHome};
//! use hangar_store::{CapabilityStore, InvocationRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolved = Config::load(None)?;
//! let home = HangarHome::from_path(resolved.home_dir());
//! let store = CapabilityStore::open(home, &resolved.config)?;
//!
//! let id = CapabilityId::new("tutor")?;
//! store.install(CapabilityKind::Agent, &id).await?;
//! let reply = store
//!     .invoke(CapabilityKind::Agent, &id, &InvocationRequest::new("hello"))
//!     .await;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod descriptor;
pub mod error;
pub mod fetcher;
mod fsutil;
pub mod provision;
pub mod registry;
pub mod router;
pub mod state;
pub mod store;

pub use descriptor::{
    CapabilityDescriptor, ChatMessage, EntryKind, EntrySpec, InstallRecord, InvocationRequest,
    InvocationResponse, ResolvedEntry,
};
pub use error::{ErrorKind, FetchError, ProvisionError, StateError, StoreError, StoreResult};
pub use fetcher::{ContentsSource, FetchReport, GitHubContents, RemoteEntry, SelectiveFetcher};
pub use provision::{EnvHandle, NoopProvisioner, Provisioner, VenvProvisioner};
pub use registry::{Registry, RegistryClient, RegistryOrigin};
pub use router::{InvocationRouter, RouterConfig};
pub use state::StateStore;
pub use store::{
    CapabilityListing, CapabilityStore, DefaultsReport, Diagnostics, InstallReport, RegistryUrls,
    StoreComponents,
};
