use crossbeam::channel::unbounded;
use std::sync::Arc;
use std::thread;

use oneflow_eager::distributed::{AllReduce, CollectiveBackend, CpuBackend};
use oneflow_eager::tensor::Tensor;

#[test]
fn test_ring_all_reduce_cpu() {
    let world_size = 4;
    let handles: Vec<_> = CpuBackend::ring(world_size)
        .into_iter()
        .map(|backend| {
            thread::spawn(move || {
                // Rank 0 has 1s, Rank 1 has 2s, etc. Sum should be 1+2+3+4 = 10.
                let rank = backend.rank();
                let data = vec![(rank + 1) as f32; 8];
                let tensor = Tensor::from_vec(data, &[2, 4]).unwrap();

                let result = backend.all_reduce_sum(&tensor).unwrap();
                assert_eq!(result.shape(), &[2, 4]);
                for val in result.to_vec::<f32>().unwrap() {
                    assert!(
                        (val - 10.0).abs() < 1e-5,
                        "Rank {}: Expected 10, got {}",
                        rank,
                        val
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_all_reduce_batches_keep_order() {
    let handles: Vec<_> = CpuBackend::ring(3)
        .into_iter()
        .map(|backend| {
            thread::spawn(move || {
                let ar = AllReduce::new(Arc::new(backend)).unwrap();
                let r = ar.rank() as i64;
                let batch = [
                    Tensor::from_vec(vec![r], &[1]).unwrap(),
                    Tensor::from_vec(vec![r * 10, r * 100], &[2]).unwrap(),
                ];
                let out = ar.reduce_batch(&batch).unwrap();
                (
                    out[0].to_vec::<i64>().unwrap(),
                    out[1].to_vec::<i64>().unwrap(),
                    ar.parallel_desc().parallel_num(),
                )
            })
        })
        .collect();

    for handle in handles {
        let (a, b, parallel_num) = handle.join().unwrap();
        assert_eq!(a, vec![3]);
        assert_eq!(b, vec![30, 300]);
        assert_eq!(parallel_num, 3);
    }
}

#[test]
fn test_cpu_backend_properties() {
    let (tx, rx) = unbounded();
    let backend = CpuBackend::new(2, 4, rx, tx);
    assert_eq!(backend.rank(), 2);
    assert_eq!(backend.world_size(), 4);
}

#[test]
fn test_broadcast_root_out_of_range() {
    let (tx, rx) = unbounded();
    let backend = CpuBackend::new(0, 2, rx, tx);
    let tensor = Tensor::from_vec(vec![1.0f32], &[1]).unwrap();
    assert!(backend.broadcast(&tensor, 5).is_err());
}
