use std::collections::HashMap;
use std::sync::Arc;

use crate::blob::{BlobId, BlobObject, OpArgParallelAttribute, TensorDef};
use crate::error::{Error, Result};
use crate::op_attr::OpAttribute;
use crate::placement::{CfgParallelConf, ParallelDesc};
use crate::tensor::Tensor;

use super::RuntimeStats;

/// Blob objects and their current values, owned by the runtime's worker.
#[derive(Debug, Default)]
pub(crate) struct BlobStore {
    next_id: u64,
    objects: HashMap<BlobId, Arc<BlobObject>>,
    values: HashMap<BlobId, Tensor>,
}

impl BlobStore {
    fn mint_id(&mut self) -> BlobId {
        self.next_id += 1;
        BlobId(self.next_id)
    }
}

/// Handle a build closure uses to issue instructions.
///
/// Only exists for the duration of one build; everything it touches belongs to the
/// runtime.
pub struct InstructionsBuilder<'a> {
    store: &'a mut BlobStore,
    stats: &'a mut RuntimeStats,
}

impl<'a> InstructionsBuilder<'a> {
    pub(crate) fn new(store: &'a mut BlobStore, stats: &'a mut RuntimeStats) -> Self {
        Self { store, stats }
    }

    /// Creates a blob object referring to the output of interface op `op_name`.
    ///
    /// Blobs declared with a static shape start out zero-filled; others hold no value
    /// until fed.
    pub fn make_lazy_ref_blob_object(
        &mut self,
        op_name: &str,
        op_attribute: &OpAttribute,
        parallel_conf: &CfgParallelConf,
    ) -> Result<Arc<BlobObject>> {
        let parallel_desc = Arc::new(ParallelDesc::new(parallel_conf)?);
        let id = self.store.mint_id();
        let attr = OpArgParallelAttribute::new(parallel_desc, op_attribute.is_mirrored);
        let blob_object = Arc::new(BlobObject::new(
            id,
            attr,
            op_attribute.output_desc.clone(),
        ));

        if let Some(desc) = op_attribute.output_desc.as_ref().filter(|d| !d.is_dynamic) {
            if desc.dtype.is_feedable() {
                let zeros = Tensor::zeros(&desc.shape, desc.dtype)?;
                self.store.values.insert(id, zeros);
            }
        }

        tracing::debug!(%op_name, %id, mirrored = op_attribute.is_mirrored, "lazy-ref blob object");
        self.store.objects.insert(id, blob_object.clone());
        self.stats.lazy_ref_blobs += 1;
        Ok(blob_object)
    }

    /// Overwrites the value held by `blob_object`.
    pub fn feed_blob(
        &mut self,
        blob_object: &BlobObject,
        tensor_def: &TensorDef,
        value: &Tensor,
    ) -> Result<()> {
        self.known(blob_object)?;
        tensor_def.check(blob_object.blob_desc())?;
        if tensor_def.shape() != value.shape() || tensor_def.dtype() != value.dtype() {
            return Err(Error::Runtime(format!(
                "tensor def does not describe the value fed to {}",
                blob_object.id()
            )));
        }
        self.store.values.insert(blob_object.id(), value.clone());
        self.stats.feeds += 1;
        Ok(())
    }

    /// Copies the current value of `blob_object` back to the host.
    pub fn read_blob(&mut self, blob_object: &BlobObject) -> Result<Tensor> {
        self.known(blob_object)?;
        let value = self
            .store
            .values
            .get(&blob_object.id())
            .cloned()
            .ok_or_else(|| Error::Runtime(format!("{} has no value yet", blob_object.id())))?;
        self.stats.reads += 1;
        Ok(value)
    }

    pub fn blob_object(&self, id: BlobId) -> Option<Arc<BlobObject>> {
        self.store.objects.get(&id).cloned()
    }

    fn known(&self, blob_object: &BlobObject) -> Result<()> {
        if self.store.objects.contains_key(&blob_object.id()) {
            Ok(())
        } else {
            Err(Error::Runtime(format!(
                "{} does not belong to this runtime",
                blob_object.id()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobDesc;
    use crate::placement::{AnyParallelConf, ParallelConf};
    use crate::tensor::DType;

    fn cpu0() -> CfgParallelConf {
        AnyParallelConf::from(ParallelConf::new("cpu", &["0:0"])).into_cfg()
    }

    #[test]
    fn test_lazy_ref_zero_initialized() {
        let mut store = BlobStore::default();
        let mut stats = RuntimeStats::default();
        let mut builder = InstructionsBuilder::new(&mut store, &mut stats);

        let attr = OpAttribute::interface("w").with_output_desc(BlobDesc::new(&[2], DType::Int32));
        let obj = builder.make_lazy_ref_blob_object("w", &attr, &cpu0()).unwrap();
        let value = builder.read_blob(&obj).unwrap();
        assert_eq!(value.to_vec::<i32>().unwrap(), vec![0, 0]);
        assert!(builder.blob_object(obj.id()).is_some());
        assert_eq!(stats.lazy_ref_blobs, 1);
        assert_eq!(stats.reads, 1);
    }

    #[test]
    fn test_read_before_feed_fails() {
        let mut store = BlobStore::default();
        let mut stats = RuntimeStats::default();
        let mut builder = InstructionsBuilder::new(&mut store, &mut stats);

        let obj = builder
            .make_lazy_ref_blob_object("x", &OpAttribute::interface("x"), &cpu0())
            .unwrap();
        assert!(matches!(builder.read_blob(&obj), Err(Error::Runtime(_))));

        let value = Tensor::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
        let def = TensorDef::for_blob(&obj, &value);
        builder.feed_blob(&obj, &def, &value).unwrap();
        assert_eq!(builder.read_blob(&obj).unwrap(), value);
    }

    #[test]
    fn test_bad_placement_is_reported() {
        let mut store = BlobStore::default();
        let mut stats = RuntimeStats::default();
        let mut builder = InstructionsBuilder::new(&mut store, &mut stats);
        let conf = AnyParallelConf::from(ParallelConf::new("tpu", &["0:0"])).into_cfg();
        let result = builder.make_lazy_ref_blob_object("x", &OpAttribute::interface("x"), &conf);
        assert!(matches!(result, Err(Error::Placement(_))));
    }
}
