use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_gpu_compute::algorithm::{count_if_with, Strategy, SERIAL_THRESHOLD};
use rust_gpu_compute::lambda::{_1, get, Function};
use rust_gpu_compute::types::{Int2, Int4};
use rust_gpu_compute::{
    count, count_if, ConstantRange, CountingRange, DeviceInput, GPUError, Queue,
};

const STRATEGIES: [Strategy; 3] = [Strategy::Serial, Strategy::Threads, Strategy::Reduce];

/// Returns a queue for the default device, or `None` if there is no OpenCL device.
fn queue() -> Option<Queue> {
    let _ = env_logger::builder().is_test(true).try_init();
    match Queue::default_queue() {
        Ok(queue) => Some(queue),
        Err(error) => {
            info!("Skipping test, no OpenCL device: {}", error);
            None
        }
    }
}

#[test]
fn count_int() {
    let Some(queue) = queue() else { return };
    let data = queue.create_buffer_from_slice(&[1, 2, 1, 2, 3]).unwrap();

    assert_eq!(count(&queue, &data, 1).unwrap(), 2);
    assert_eq!(count(&queue, &data, 2).unwrap(), 2);
    assert_eq!(count(&queue, &data, 3).unwrap(), 1);
    assert_eq!(count(&queue, &data.slice(1..).unwrap(), 1).unwrap(), 1);
    assert_eq!(count(&queue, &data.slice(1..4).unwrap(), 3).unwrap(), 0);
    assert_eq!(count(&queue, &data.slice(1..4).unwrap(), 2).unwrap(), 2);
}

#[test]
fn count_constant_range() {
    let Some(queue) = queue() else { return };
    assert_eq!(count(&queue, &ConstantRange::new(18, 5), 18).unwrap(), 5);
    assert_eq!(count(&queue, &ConstantRange::new(19, 5), 18).unwrap(), 0);
}

#[test]
fn count_if_float() {
    let Some(queue) = queue() else { return };
    let data = queue
        .create_buffer_from_slice(&[1.0f32, 2.5, -1.0, 3.0, 5.0, -8.0])
        .unwrap();
    let first_five = data.slice(..5).unwrap();
    assert_eq!(count_if(&queue, &first_five, _1.gt(2.0f32)).unwrap(), 3);
}

#[test]
fn count_int4() {
    let Some(queue) = queue() else { return };
    let data = queue
        .create_buffer_from_slice(&[
            Int4::new(1, 2, 3, 4),
            Int4::new(4, 5, 6, 7),
            Int4::new(7, 8, 9, 1),
            Int4::new(1, 2, 3, 4),
            Int4::new(4, 5, 6, 7),
            Int4::new(0, 3, 2, 2),
        ])
        .unwrap();

    let expected = [
        (Int4::new(1, 2, 3, 4), 2),
        (Int4::new(4, 5, 6, 7), 2),
        (Int4::new(7, 8, 9, 1), 1),
        (Int4::new(0, 3, 2, 2), 1),
        (Int4::new(3, 4, 4, 5), 0),
        (Int4::new(1, 2, 3, 0), 0),
        (Int4::new(1, 9, 8, 7), 0),
    ];
    for (value, expected) in expected {
        assert_eq!(count(&queue, &data, value).unwrap(), expected, "{:?}", value);
    }
}

#[test]
fn count_newlines() {
    let Some(queue) = queue() else { return };
    let text = "abcdefg\nhijklmn\nopqrs\ntuv\nwxyz\n";
    let data = queue.create_buffer_from_slice(text.as_bytes()).unwrap();
    assert_eq!(count(&queue, &data, b'\n').unwrap(), 5);
}

#[test]
fn count_uchar() {
    let Some(queue) = queue() else { return };
    let data = queue
        .create_buffer_from_slice(&[0x00u8, 0x10, 0x2F, 0x10, 0x01, 0x00, 0x01, 0x00])
        .unwrap();
    assert_eq!(count(&queue, &data, 0x00).unwrap(), 3);
    assert_eq!(count(&queue, &data, 0x10).unwrap(), 2);
    assert_eq!(count(&queue, &data, 0x2F).unwrap(), 1);
    assert_eq!(count(&queue, &data, 0x01).unwrap(), 2);
    assert_eq!(count(&queue, &data, 0xFF).unwrap(), 0);
}

#[test]
fn count_if_vector_lanes() {
    let Some(queue) = queue() else { return };
    let data = queue
        .create_buffer_from_slice(&[
            Int2::new(1, 2),
            Int2::new(3, 4),
            Int2::new(5, 6),
            Int2::new(7, 8),
        ])
        .unwrap();
    assert_eq!(count_if(&queue, &data, get(0, _1).lt(4)).unwrap(), 2);
    assert_eq!(count_if(&queue, &data, get(1, _1).gt(3)).unwrap(), 3);
}

#[test]
fn every_strategy_matches_host_count() {
    let Some(queue) = queue() else { return };
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for len in [1, SERIAL_THRESHOLD - 1, SERIAL_THRESHOLD, 1000, 65_537] {
        let data: Vec<u32> = (0..len).map(|_| rng.gen_range(0..16)).collect();
        let buffer = queue.create_buffer_from_slice(&data).unwrap();
        let expected = data.iter().filter(|&&value| value < 5).count();

        for strategy in STRATEGIES {
            let counted = count_if_with(&queue, &buffer, _1.lt(5u32), strategy).unwrap();
            assert_eq!(counted, expected, "{:?} with {} elements", strategy, len);
        }
        assert_eq!(count_if(&queue, &buffer, _1.lt(5u32)).unwrap(), expected);
    }
}

#[test]
fn large_slices() {
    let Some(queue) = queue() else { return };
    let mut rng = StdRng::seed_from_u64(7);
    let data: Vec<i8> = (0..100_000).map(|_| rng.gen()).collect();
    let buffer = queue.create_buffer_from_slice(&data).unwrap();

    let (start, end) = (123, 98_765);
    let expected = data[start..end].iter().filter(|&&value| value == -3).count();
    let slice = buffer.slice(start..end).unwrap();
    assert_eq!(slice.len(), end - start);
    assert_eq!(count(&queue, &slice, -3).unwrap(), expected);
}

#[test]
fn counting_range_and_functions() {
    let Some(queue) = queue() else { return };
    let is_odd = Function::new("is_odd", "bool is_odd(int x) { return x & 1; }");
    let range = CountingRange::new(0, 1001);
    assert_eq!(count_if(&queue, &range, &is_odd).unwrap(), 500);
    assert_eq!(count_if(&queue, &range, (_1 % 3).equal(0)).unwrap(), 334);

    let data = queue
        .create_buffer_from_slice(&[1, 2, 3, 4, 5, 6, 7])
        .unwrap();
    assert_eq!(count_if(&queue, &data, is_odd).unwrap(), 4);
}

#[test]
fn empty_inputs() {
    let Some(queue) = queue() else { return };
    let data = queue.create_buffer_from_slice(&[1, 2, 3]).unwrap();
    assert_eq!(count(&queue, &data.slice(2..2).unwrap(), 3).unwrap(), 0);
    assert_eq!(count(&queue, &ConstantRange::new(1, 0), 1).unwrap(), 0);
    assert!(matches!(
        queue.create_buffer_from_slice::<i32>(&[]),
        Err(GPUError::Generic(_))
    ));
}

#[test]
fn invalid_ranges() {
    let Some(queue) = queue() else { return };
    let data = queue.create_buffer_from_slice(&[1, 2, 3]).unwrap();
    assert!(matches!(
        data.slice(1..4),
        Err(GPUError::InvalidRange {
            start: 1,
            end: 4,
            length: 3
        })
    ));
    #[allow(clippy::reversed_empty_ranges)]
    let reversed = data.slice(2..1);
    assert!(matches!(reversed, Err(GPUError::InvalidRange { .. })));
}

#[test]
fn programs_are_reused() {
    let Some(queue) = queue() else { return };
    queue.clear_program_cache();
    let data = queue.create_buffer_from_slice(&[1, 2, 1, 2, 3]).unwrap();

    // The value and the range are kernel arguments or literals, the slices share one program.
    count(&queue, &data, 1).unwrap();
    count(&queue, &data.slice(1..).unwrap(), 1).unwrap();
    count(&queue, &data.slice(2..).unwrap(), 1).unwrap();
    assert_eq!(queue.cached_programs(), 2);

    count(&queue, &data, 2).unwrap();
    assert_eq!(queue.cached_programs(), 3, "The value is part of the predicate.");
}

#[test]
fn concurrent_counts_share_programs() {
    let Some(queue) = queue() else { return };
    let data: Vec<i32> = (0..4096).map(|i| i % 7).collect();
    let buffer = queue.create_buffer_from_slice(&data).unwrap();

    // All slices use the same program, only the offset and length arguments differ.
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let (queue, buffer, data) = (&queue, &buffer, &data);
                scope.spawn(move || {
                    for round in 0..20 {
                        let start = thread * 100 + round;
                        let slice = buffer.slice(start..).unwrap();
                        let expected = data[start..].iter().filter(|&&value| value == 3).count();
                        assert_eq!(count(queue, &slice, 3).unwrap(), expected, "from {}", start);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

#[test]
fn count_after_rewrite() {
    let Some(queue) = queue() else { return };
    let mut buffer = queue.create_buffer_from_slice(&[1u32; 64]).unwrap();
    assert_eq!(count(&queue, &buffer, 1).unwrap(), 64);

    let rewritten: Vec<u32> = (0..64).map(|i| i % 4).collect();
    queue.write_from_buffer(&mut buffer, &rewritten).unwrap();
    assert_eq!(count(&queue, &buffer, 1).unwrap(), 16);
    assert_eq!(queue.read_to_vec(&buffer).unwrap(), rewritten);

    // Shorter data only replaces the beginning.
    queue.write_from_buffer(&mut buffer, &[1, 1, 1, 1]).unwrap();
    assert_eq!(count(&queue, &buffer, 1).unwrap(), 19);
}
