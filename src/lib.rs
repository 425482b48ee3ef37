//! netconf-provider - schema-driven NETCONF service provider
//!
//! This library turns typed operation requests (read, edit or a generic RPC
//! over a data tree) into NETCONF `<rpc>` exchanges on an established
//! session, and turns the replies back into data trees or typed errors.
//! Data trees are RFC 7951 JSON values checked against a schema loaded for
//! the session's advertised modules.
//!
//! # Example
//!
//! ```no_run
//! use netconf_provider::{
//!     ConnectionTarget, Connector, EditOperation, EncodingFormat, NetconfServiceProvider,
//!     OperationRequest, Repository,
//! };
//! use serde_json::json;
//!
//! fn configure(connector: impl Connector + 'static) -> netconf_provider::Result<()> {
//!     let provider = NetconfServiceProvider::builder()
//!         .target(ConnectionTarget::new("192.0.2.10", "admin", "admin").with_port(2830))
//!         .connector(connector)
//!         .repository(Repository::from_dir("models")?)
//!         .encoding(EncodingFormat::Json)
//!         .build()?;
//!
//!     let interfaces = json!({"example-if:interfaces": {"interface": [{"name": "eth0", "mtu": 9000}]}});
//!     let edit = OperationRequest::new("ietf-netconf:edit-config")
//!         .with_payload(interfaces)
//!         .with_annotation(EditOperation::Merge);
//!     provider.invoke(&edit)?;
//!
//!     let state = provider.invoke(&OperationRequest::new("ietf-netconf:get"))?;
//!     println!("{}", state);
//!     provider.close()
//! }
//! ```

pub mod capabilities;
mod codec;
mod datastore;
mod dispatcher;
mod encoding;
mod envelope;
mod error;
pub mod loopback;
mod operation;
mod provider;
mod schema;
mod session;
mod types;
mod xml;

pub use capabilities::Capabilities;
pub use codec::{decode_data, encode_data};
pub use datastore::{Editor, select};
pub use encoding::{EncodingFormat, select_encoding};
pub use error::{ErrorKind, NetconfError, ProtocolFailure, Result, RpcError, SessionError};
pub use loopback::{LoopbackHandle, LoopbackSession, RpcHandler};
pub use operation::{Datastore, EditOperation, OperationKind, OperationRequest};
pub use provider::{NetconfServiceProvider, ProviderBuilder};
pub use schema::{
    ModuleInfo, ModuleSchema, NodeKind, Repository, RpcSchema, SchemaNode, SchemaRoot, TreeMode,
};
pub use session::{ConnectionTarget, Connector, Session, Transport};
pub use types::YangType;

/// A data tree in RFC 7951 JSON form
pub type DataTree = serde_json::Value;
