use rust_gpu_compute::algorithm::{count_if_with, Strategy};
use rust_gpu_compute::lambda::{_1, get};
use rust_gpu_compute::types::Int2;
use rust_gpu_compute::{count, count_if, ConstantRange, Device, GPUError, Queue};

fn run(queue: &Queue) -> Result<(), GPUError> {
    // Count lines of a text.
    let text = "abcdefg\nhijklmn\nopqrs\ntuv\nwxyz\n";
    let bytes = queue.create_buffer_from_slice(text.as_bytes())?;
    println!("Lines: {}", count(queue, &bytes, b'\n')?);

    // Count within a part of a buffer.
    let numbers = queue.create_buffer_from_slice(&[1, 2, 1, 2, 3])?;
    println!(
        "Twos after the first element: {}",
        count(queue, &numbers.slice(1..)?, 2)?
    );

    // Predicates on vector lanes.
    let points = queue.create_buffer_from_slice(&[
        Int2::new(1, 2),
        Int2::new(3, 4),
        Int2::new(5, 6),
        Int2::new(7, 8),
    ])?;
    println!("Points left of x=4: {}", count_if(queue, &points, get(0, _1).lt(4))?);

    // Ranges without device memory, counted with every strategy.
    let constant = ConstantRange::new(18, 100_000);
    for strategy in [Strategy::Serial, Strategy::Threads, Strategy::Reduce] {
        let counted = count_if_with(queue, &constant, _1.equal(18), strategy)?;
        println!("{:?}: {}", strategy, counted);
    }
    println!("Programs in memory: {}", queue.cached_programs());
    Ok(())
}

pub fn main() {
    env_logger::init();

    for device in Device::all() {
        println!("{} ({:?}, {})", device.name(), device.kind(), device.vendor());
    }

    let queue = match Queue::default_queue() {
        Ok(queue) => queue,
        Err(error) => {
            eprintln!("No OpenCL device available: {}", error);
            return;
        }
    };
    println!("Running on {}", queue.device_name());
    run(&queue).unwrap();
}
