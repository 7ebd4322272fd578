//! Op attributes and their lookup.
//!
//! The eager layer never inspects a graph. Everything it knows about an interface op comes
//! from an [`OpAttributeResolver`]: the op's attribute descriptor, the job that owns it and
//! its placement. [`InterfaceOpRegistry`] is the in-memory resolver sessions are built with.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use crate::blob::BlobDesc;
use crate::error::{Error, Result};
use crate::placement::{AnyParallelConf, ParallelConf};

/// Declared inputs and outputs of an op. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpAttribute {
    pub op_name: String,
    #[serde(default)]
    pub input_bns: Vec<String>,
    pub output_bns: Vec<String>,
    #[serde(default)]
    pub is_mirrored: bool,
    /// Declared description of the single output, if known ahead of time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_desc: Option<BlobDesc>,
}

impl OpAttribute {
    /// Attribute of an interface op: no inputs, one output named `out`.
    pub fn interface(op_name: impl Into<String>) -> Self {
        Self {
            op_name: op_name.into(),
            input_bns: Vec::new(),
            output_bns: vec!["out".to_string()],
            is_mirrored: false,
            output_desc: None,
        }
    }

    pub fn mirrored(mut self, is_mirrored: bool) -> Self {
        self.is_mirrored = is_mirrored;
        self
    }

    pub fn with_output_desc(mut self, desc: BlobDesc) -> Self {
        self.output_desc = Some(desc);
        self
    }

    /// The one output binding name of an interface op.
    ///
    /// # Panics
    ///
    /// Panics unless there is exactly one output binding.
    pub fn sole_output_bn(&self) -> &str {
        assert_eq!(
            self.output_bns.len(),
            1,
            "interface op `{}` must have exactly one output",
            self.op_name
        );
        &self.output_bns[0]
    }
}

/// `op_name/blob_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalBlobId {
    op_name: String,
    blob_name: String,
}

impl LogicalBlobId {
    pub fn new(op_name: impl Into<String>, blob_name: impl Into<String>) -> Self {
        Self {
            op_name: op_name.into(),
            blob_name: blob_name.into(),
        }
    }

    pub fn op_name(&self) -> &str {
        &self.op_name
    }

    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }
}

impl fmt::Display for LogicalBlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.op_name, self.blob_name)
    }
}

impl FromStr for LogicalBlobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((op, blob)) if !op.is_empty() && !blob.is_empty() && !blob.contains('/') => {
                Ok(Self::new(op, blob))
            }
            _ => Err(Error::NotFound {
                kind: "logical blob id",
                name: s.to_string(),
            }),
        }
    }
}

/// Anything that names a logical blob, normalized on use.
pub trait IntoLogicalBlobId {
    fn into_lbi(self) -> Result<LogicalBlobId>;
}

impl IntoLogicalBlobId for LogicalBlobId {
    fn into_lbi(self) -> Result<LogicalBlobId> {
        Ok(self)
    }
}

impl IntoLogicalBlobId for &LogicalBlobId {
    fn into_lbi(self) -> Result<LogicalBlobId> {
        Ok(self.clone())
    }
}

impl IntoLogicalBlobId for &str {
    fn into_lbi(self) -> Result<LogicalBlobId> {
        self.parse()
    }
}

impl IntoLogicalBlobId for (&str, &str) {
    fn into_lbi(self) -> Result<LogicalBlobId> {
        Ok(LogicalBlobId::new(self.0, self.1))
    }
}

/// Metadata lookups for interface ops.
///
/// Unknown names fail with [`Error::NotFound`]; callers propagate it unchanged.
pub trait OpAttributeResolver: Send + Sync {
    fn op_attribute_for(&self, op_name: &str) -> Result<OpAttribute>;
    fn job_name_for(&self, op_name: &str) -> Result<String>;
    fn parallel_conf_for(&self, op_name: &str) -> Result<AnyParallelConf>;
}

/// One interface op as declared in a session config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceOpDecl {
    pub job_name: String,
    pub op_attribute: OpAttribute,
    pub parallel_conf: ParallelConf,
}

#[derive(Debug, Clone)]
struct Entry {
    job_name: String,
    op_attribute: OpAttribute,
    parallel_conf: AnyParallelConf,
}

/// In-memory resolver keyed by op name.
#[derive(Debug, Default)]
pub struct InterfaceOpRegistry {
    ops: RwLock<HashMap<String, Entry>>,
}

impl InterfaceOpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an interface op.
    pub fn register(
        &self,
        job_name: impl Into<String>,
        op_attribute: OpAttribute,
        parallel_conf: impl Into<AnyParallelConf>,
    ) {
        let entry = Entry {
            job_name: job_name.into(),
            op_attribute,
            parallel_conf: parallel_conf.into(),
        };
        tracing::debug!(op_name = %entry.op_attribute.op_name, job = %entry.job_name, "register interface op");
        self.ops
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.op_attribute.op_name.clone(), entry);
    }

    pub fn from_decls(decls: &[InterfaceOpDecl]) -> Self {
        let registry = Self::new();
        for decl in decls {
            registry.register(
                decl.job_name.as_str(),
                decl.op_attribute.clone(),
                decl.parallel_conf.clone(),
            );
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.ops.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entry<T>(&self, op_name: &str, f: impl FnOnce(&Entry) -> T) -> Result<T> {
        let ops = self.ops.read().unwrap_or_else(PoisonError::into_inner);
        ops.get(op_name)
            .map(f)
            .ok_or_else(|| Error::op_not_found(op_name))
    }
}

impl OpAttributeResolver for InterfaceOpRegistry {
    fn op_attribute_for(&self, op_name: &str) -> Result<OpAttribute> {
        self.with_entry(op_name, |e| e.op_attribute.clone())
    }

    fn job_name_for(&self, op_name: &str) -> Result<String> {
        self.with_entry(op_name, |e| e.job_name.clone())
    }

    fn parallel_conf_for(&self, op_name: &str) -> Result<AnyParallelConf> {
        self.with_entry(op_name, |e| e.parallel_conf.clone())
    }
}
