// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_isp::{
    buffer::{Buffer, BufferState, Plane},
    completion::irq,
    node::NodeRole,
    notify::{CompletedBuffer, FrameSync},
    sim::SimRegisters,
    IspError, Scheduler, SchedulerConfig,
};
use serial_test::serial;
use std::{
    error::Error,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

const GROUPS: usize = 4;
const FRAMES: u32 = 50;
const BUFFERS: u32 = 2;
const ROLES: [NodeRole; 2] = [NodeRole::Input0, NodeRole::Frame];

fn buffer(sched: &Scheduler, group: usize, role: NodeRole, index: u32) -> Result<Buffer, IspError> {
    let base = (group as u64) << 28 | (role.index() as u64) << 24 | (index as u64) << 16;
    let planes = sched
        .format(group, role)?
        .plane_sizes()
        .enumerate()
        .map(|(plane, len)| Plane::new(base + plane as u64 * 0x1000, len))
        .collect();
    Ok(Buffer::new(index, planes))
}

struct Rig {
    sim: Arc<SimRegisters>,
    sched: Arc<Scheduler>,
    done: kanal::Receiver<CompletedBuffer>,
    events: kanal::Receiver<FrameSync>,
    stop: Arc<AtomicBool>,
    hardware: thread::JoinHandle<()>,
}

/// Scheduler wired to a hardware thread that answers every trigger with
/// frame start then frame done.
fn rig() -> Result<Rig, Box<dyn Error>> {
    let (trigger_tx, trigger_rx) = kanal::unbounded::<u64>();
    let (done_tx, done) = kanal::unbounded::<CompletedBuffer>();
    let (event_tx, events) = kanal::unbounded::<FrameSync>();

    let sim = Arc::new(SimRegisters::new().with_trigger_notify(trigger_tx));
    let config = SchedulerConfig {
        groups: GROUPS,
        disable_params: true,
        ..Default::default()
    };
    let sched = Arc::new(Scheduler::new(
        config,
        sim.clone(),
        Arc::new(done_tx),
        Arc::new(event_tx),
    )?);

    let stop = Arc::new(AtomicBool::new(false));
    let hardware = {
        let (sim, sched, stop) = (sim.clone(), sched.clone(), stop.clone());
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if trigger_rx.recv_timeout(Duration::from_millis(10)).is_ok() {
                    sim.raise(irq::FS1);
                    sched.handle_interrupt().expect("status read");
                    thread::sleep(Duration::from_micros(100));
                    sim.raise(irq::FD2);
                    sched.handle_interrupt().expect("status read");
                }
            }
        })
    };

    Ok(Rig {
        sim,
        sched,
        done,
        events,
        stop,
        hardware,
    })
}

/// Every group fills and starts its nodes from its own thread.
fn start_groups(sched: &Arc<Scheduler>) -> Result<(), Box<dyn Error>> {
    let producers: Vec<_> = (0..GROUPS)
        .map(|group| {
            let sched = sched.clone();
            thread::spawn(move || -> Result<(), IspError> {
                for index in 0..BUFFERS {
                    for role in ROLES {
                        sched.queue_buffer(group, role, buffer(&sched, group, role, index)?)?;
                    }
                }
                for role in ROLES {
                    sched.start_streaming(group, role)?;
                }
                Ok(())
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked")?;
    }
    Ok(())
}

fn recv(done: &kanal::Receiver<CompletedBuffer>, timeout: Duration) -> Option<CompletedBuffer> {
    done.recv_timeout(timeout).ok()
}

#[test]
#[serial]
fn test_concurrent_groups_never_overlap() -> Result<(), Box<dyn Error>> {
    let rig = rig()?;
    start_groups(&rig.sched)?;

    let mut sequences: Vec<Vec<u32>> = vec![Vec::new(); GROUPS];
    let mut held = 0;
    while sequences.iter().any(|s| (s.len() as u32) < FRAMES) {
        let CompletedBuffer {
            group,
            role,
            mut buffer,
        } = recv(&rig.done, Duration::from_secs(5)).ok_or("scheduler stalled")?;
        assert_eq!(buffer.state(), BufferState::Done);

        if role == NodeRole::Frame {
            sequences[group].push(buffer.sequence());
        }
        if (sequences[group].len() as u32) < FRAMES {
            buffer.requeue();
            rig.sched.queue_buffer(group, role, buffer)?;
        } else {
            held += 1;
        }
    }

    // Stop every group concurrently while jobs are still running.
    let stoppers: Vec<_> = (0..GROUPS)
        .map(|group| {
            let sched = rig.sched.clone();
            thread::spawn(move || -> Result<usize, IspError> {
                let mut dropped = 0;
                for role in ROLES {
                    dropped += sched.stop_streaming(group, role)?;
                }
                Ok(dropped)
            })
        })
        .collect();
    for stopper in stoppers {
        stopper.join().expect("stopper panicked")?;
    }
    assert!(!rig.sched.is_busy());

    while let Some(done) = recv(&rig.done, Duration::from_millis(100)) {
        if done.role == NodeRole::Frame && done.buffer.state() == BufferState::Done {
            sequences[done.group].push(done.buffer.sequence());
        }
        held += 1;
    }

    rig.stop.store(true, Ordering::Release);
    rig.hardware.join().expect("hardware thread panicked");

    // No buffer is lost and the engine never ran two jobs at once.
    assert_eq!(held, GROUPS * ROLES.len() * BUFFERS as usize);
    assert_eq!(rig.sim.overlapping_triggers(), 0);

    // Sequences advance by exactly one per completed job.
    let mut total = 0;
    for (group, seqs) in sequences.iter().enumerate() {
        let expected: Vec<u32> = (0..seqs.len() as u32).collect();
        assert_eq!(seqs, &expected, "group {}", group);
        assert_eq!(rig.sched.frame_sequence(group)?, seqs.len() as u32);
        total += seqs.len() as u64;
    }
    assert_eq!(rig.sim.triggers(), total);

    // Frame-sync events arrive in admission order, one per trigger.
    let mut next = [0u32; GROUPS];
    let mut events = 0;
    while let Some(event) = rig.events.try_recv()? {
        assert_eq!(event.sequence, next[event.group], "group {}", event.group);
        next[event.group] += 1;
        events += 1;
    }
    assert_eq!(events, total);

    Ok(())
}

#[test]
#[serial]
fn test_every_group_makes_progress() -> Result<(), Box<dyn Error>> {
    let rig = rig()?;
    start_groups(&rig.sched)?;

    let mut frames = [0u32; GROUPS];
    for _ in 0..(GROUPS as u32 * 10 * ROLES.len() as u32) {
        let CompletedBuffer {
            group,
            role,
            mut buffer,
        } = recv(&rig.done, Duration::from_secs(5)).ok_or("scheduler stalled")?;
        if role == NodeRole::Frame {
            frames[group] += 1;
        }
        buffer.requeue();
        rig.sched.queue_buffer(group, role, buffer)?;
    }

    for group in 0..GROUPS {
        for role in ROLES {
            rig.sched.stop_streaming(group, role)?;
        }
    }
    rig.stop.store(true, Ordering::Release);
    rig.hardware.join().expect("hardware thread panicked");

    assert!(frames.iter().all(|f| *f > 0), "starved group {:?}", frames);
    assert_eq!(rig.sim.overlapping_triggers(), 0);

    Ok(())
}
