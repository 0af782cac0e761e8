//! Versioned JSON envelopes for persisted snapshots, sessions and tree specs.
//!
//! Payloads are wrapped as `{"schema": N, "payload": ...}`. Decoding rejects unknown
//! fields, unknown schema numbers and payloads that break their structural invariants.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::plan::{validate_session_graph, PlanningSession, TreeSpec};
use crate::types::ObservedSnapshot;

pub const SNAPSHOT_SCHEMA: u32 = 1;
pub const SESSION_SCHEMA: u32 = 1;
pub const TREE_SPEC_SCHEMA: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported {what} schema {found} (expected {expected})")]
    UnsupportedSchema {
        what: &'static str,
        found: u32,
        expected: u32,
    },
    #[error("invalid {what}: {message}")]
    Invalid { what: &'static str, message: String },
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    schema: u32,
    payload: &'a T,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaHeader {
    schema: u32,
    #[allow(dead_code)]
    payload: serde::de::IgnoredAny,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope<T> {
    #[allow(dead_code)]
    schema: u32,
    payload: T,
}

fn encode<T: Serialize>(what: &'static str, schema: u32, payload: &T) -> Result<String, CodecError> {
    serde_json::to_string(&EnvelopeRef { schema, payload })
        .map_err(|source| CodecError::Encode { what, source })
}

fn decode<T: DeserializeOwned>(what: &'static str, expected: u32, raw: &str) -> Result<T, CodecError> {
    let header: SchemaHeader =
        serde_json::from_str(raw).map_err(|source| CodecError::Decode { what, source })?;
    if header.schema != expected {
        return Err(CodecError::UnsupportedSchema {
            what,
            found: header.schema,
            expected,
        });
    }
    let envelope: Envelope<T> =
        serde_json::from_str(raw).map_err(|source| CodecError::Decode { what, source })?;
    Ok(envelope.payload)
}

pub fn encode_snapshot(snapshot: &ObservedSnapshot) -> Result<String, CodecError> {
    encode("snapshot", SNAPSHOT_SCHEMA, snapshot)
}

pub fn decode_snapshot(raw: &str) -> Result<ObservedSnapshot, CodecError> {
    let snapshot: ObservedSnapshot = decode("snapshot", SNAPSHOT_SCHEMA, raw)?;
    snapshot
        .check_invariants()
        .map_err(|err| CodecError::Invalid {
            what: "snapshot",
            message: err.to_string(),
        })?;
    Ok(snapshot)
}

pub fn encode_session(session: &PlanningSession) -> Result<String, CodecError> {
    encode("planning session", SESSION_SCHEMA, session)
}

pub fn decode_session(raw: &str) -> Result<PlanningSession, CodecError> {
    let session: PlanningSession = decode("planning session", SESSION_SCHEMA, raw)?;
    validate_session_graph(&session.nodes, &session.edges).map_err(|err| CodecError::Invalid {
        what: "planning session",
        message: err.to_string(),
    })?;
    Ok(session)
}

pub fn encode_tree_spec(spec: &TreeSpec) -> Result<String, CodecError> {
    encode("tree spec", TREE_SPEC_SCHEMA, spec)
}

pub fn decode_tree_spec(raw: &str) -> Result<TreeSpec, CodecError> {
    let spec: TreeSpec = decode("tree spec", TREE_SPEC_SCHEMA, raw)?;
    spec.check_forest().map_err(|err| CodecError::Invalid {
        what: "tree spec",
        message: err.to_string(),
    })?;
    Ok(spec)
}
