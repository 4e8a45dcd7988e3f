use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_isp::{
    buffer::{Buffer, Plane},
    completion::irq,
    node::NodeRole,
    notify::{BufferSink, CompletedBuffer, EventSink, FrameSync},
    sim::SimRegisters,
    Scheduler, SchedulerConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;

const ROLES: [NodeRole; 3] = [NodeRole::Input0, NodeRole::Frame, NodeRole::Stats];

#[derive(Default)]
struct Recycler(Mutex<Vec<CompletedBuffer>>);

impl BufferSink for Recycler {
    fn buffer_done(&self, done: CompletedBuffer) {
        self.0.lock().push(done);
    }
}

impl EventSink for Recycler {
    fn frame_sync(&self, _event: FrameSync) {}
}

fn setup(groups: usize) -> (Arc<SimRegisters>, Scheduler, Arc<Recycler>) {
    let sim = Arc::new(SimRegisters::new());
    let sink = Arc::new(Recycler::default());
    let config = SchedulerConfig {
        groups,
        disable_params: true,
        ..Default::default()
    };
    let sched = Scheduler::new(config, sim.clone(), sink.clone(), sink.clone()).unwrap();

    for group in 0..groups {
        for role in ROLES {
            let format = sched.format(group, role).unwrap();
            for index in 0..2 {
                let planes = format
                    .plane_sizes()
                    .enumerate()
                    .map(|(p, len)| Plane::new(0x1000_0000 + p as u64 * 0x1000, len))
                    .collect();
                let buffer = match role {
                    NodeRole::Stats => {
                        Buffer::with_payload(index, 0x2000_0000, vec![0; format.plane_sizes().sum()])
                    }
                    _ => Buffer::new(index, planes),
                };
                sched.queue_buffer(group, role, buffer).unwrap();
            }
        }
        for role in ROLES {
            sched.start_streaming(group, role).unwrap();
        }
    }
    (sim, sched, sink)
}

pub fn benchmark_job_cycle(c: &mut Criterion) {
    let mut bench = c.benchmark_group("job_cycle");
    for groups in [1, 4, 8] {
        let (sim, sched, sink) = setup(groups);
        bench.bench_function(format!("{}-groups", groups), |b| {
            b.iter(|| {
                sim.raise(irq::STATD | irq::FD2);
                sched.handle_interrupt().unwrap();
                let done = std::mem::take(&mut *sink.0.lock());
                for CompletedBuffer {
                    group,
                    role,
                    mut buffer,
                } in done
                {
                    buffer.requeue();
                    sched.queue_buffer(group, role, buffer).unwrap();
                }
                sim.clear_log();
            })
        });
    }
    bench.finish();
}

criterion_group!(benches, benchmark_job_cycle);
criterion_main!(benches);
