use args::Args;
use clap::Parser;
use edgefirst_isp::{
    buffer::{Buffer, BufferState, Plane},
    completion::irq,
    format::{self, CaptureMode, FormatUsage, FourCC, NodeFormat, VideoFormat, PARAMS_BUFFER_SIZE},
    node::NodeRole,
    notify::{CompletedBuffer, FrameSync},
    sim::SimRegisters,
    IspError, Scheduler, SchedulerConfig,
};
use std::{
    error::Error,
    fs::File,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, info_span, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

mod args;

type DynLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Completion stalls longer than this end the run.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

fn init_tracing(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let mut layers: Vec<DynLayer> = vec![tracing_subscriber::fmt::layer().with_filter(level).boxed()];

    if args.journald {
        layers.push(tracing_journald::layer()?.with_filter(level).boxed());
    }

    if args.tracy {
        tracy_client::Client::start();
        layers.push(tracing_tracy::TracyLayer::default().boxed());
    }

    if args.tokio_console {
        let console = console_subscriber::ConsoleLayer::builder()
            .with_default_env()
            .spawn();
        layers.push(console.boxed());
    }

    let subscriber = tracing_subscriber::registry().with(layers);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .thread_name("isp-sim")
        .build()?;
    rt.block_on(run(args))
}

/// Reads a parameter block from a JSON array of bytes, zero padded to the
/// block size.
fn load_params(path: &Path) -> Result<Vec<u8>, IspError> {
    let mut block: Vec<u8> = serde_json::from_reader(File::open(path)?)?;
    if block.len() > PARAMS_BUFFER_SIZE {
        return Err(IspError::ParamsLoad(format!(
            "{} holds {} bytes, the block is {}",
            path.display(),
            block.len(),
            PARAMS_BUFFER_SIZE
        )));
    }
    block.resize(PARAMS_BUFFER_SIZE, 0);
    Ok(block)
}

fn video_format(fourcc: FourCC, usage: FormatUsage, args: &Args) -> Result<NodeFormat, IspError> {
    if !format::formats(usage).any(|f| f.fourcc == fourcc) {
        let supported: Vec<String> = format::formats(usage).map(|f| f.fourcc.to_string()).collect();
        error!("{} is not a {:?} format, supported: {}", fourcc, usage, supported.join(" "));
        return Err(IspError::UnknownFourCC(fourcc.to_string()));
    }
    VideoFormat::new(fourcc, args.size[0], args.size[1])
        .map(NodeFormat::Video)
        .ok_or_else(|| IspError::UnknownFourCC(fourcc.to_string()))
}

/// Roles the simulator streams on a group: everything required plus,
/// optionally, statistics.
fn streamed_roles(sched: &Scheduler, group: usize, stats: bool) -> Result<Vec<NodeRole>, IspError> {
    let mut roles: Vec<NodeRole> = sched.capabilities(group)?.required().iter().collect();
    if stats {
        roles.push(NodeRole::Stats);
    }
    Ok(roles)
}

/// Allocates a node's buffers with fake bus addresses.
fn allocate(
    sched: &Scheduler,
    group: usize,
    role: NodeRole,
    count: u32,
    params: &[u8],
    next_addr: &mut u64,
) -> Result<Vec<Buffer>, IspError> {
    let format = sched.format(group, role)?;
    let mut buffers = Vec::new();
    for index in 0..count {
        let buffer = match format {
            NodeFormat::Meta { buffer_size } => {
                let mut payload = vec![0u8; buffer_size];
                if role == NodeRole::Params {
                    payload[..params.len()].copy_from_slice(params);
                }
                Buffer::with_payload(index, *next_addr, payload)
            }
            NodeFormat::Video(_) => Buffer::new(
                index,
                format
                    .plane_sizes()
                    .enumerate()
                    .map(|(i, len)| Plane::new(*next_addr + (i as u64) * 0x0100_0000, len))
                    .collect(),
            ),
        };
        *next_addr += 0x1000_0000;
        buffers.push(buffer);
    }
    Ok(buffers)
}

/// Emulates the engine: every trigger produces frame start, optional
/// statistics and frame done interrupts after the configured frame time.
fn spawn_hardware(
    sim: Arc<SimRegisters>,
    sched: Arc<Scheduler>,
    triggers: kanal::Receiver<u64>,
    stats: bool,
    frame_time: Duration,
    stop: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    let interrupt = move |bits: u32| {
        sim.raise(bits);
        match sched.handle_interrupt() {
            Ok(report) => trace!("{:?}", report),
            Err(e) => error!("interrupt handling failed: {}", e),
        }
    };

    thread::Builder::new().name("isp-hw".to_string()).spawn(move || loop {
        match triggers.recv_timeout(Duration::from_millis(100)) {
            Ok(count) => {
                let _span = info_span!("frame", count).entered();
                interrupt(irq::FS1);
                thread::sleep(frame_time);
                if stats {
                    interrupt(irq::STATD);
                }
                interrupt(irq::FD2);
            }
            Err(_) if stop.load(Ordering::Acquire) => return,
            Err(_) => continue,
        }
    })
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    info!("EdgeFirst ISP scheduler simulator");

    let params = match &args.params {
        Some(path) => load_params(path)?,
        None => vec![0u8; PARAMS_BUFFER_SIZE],
    };

    let (trigger_tx, trigger_rx) = kanal::unbounded::<u64>();
    let (buf_tx, buf_rx) = kanal::unbounded::<CompletedBuffer>();
    let (event_tx, event_rx) = kanal::unbounded::<FrameSync>();

    let sim = Arc::new(SimRegisters::new().with_trigger_notify(trigger_tx));
    let sched = Arc::new(Scheduler::new(
        SchedulerConfig::from(&args),
        sim.clone(),
        Arc::new(buf_tx),
        Arc::new(event_tx),
    )?);

    let input = video_format(args.input_format, FormatUsage::RawInput, &args)?;
    let output = video_format(args.output_format, FormatUsage::Output, &args)?;
    for group in 0..args.groups {
        sched.set_format(group, NodeRole::Input0, input)?;
        sched.set_format(group, NodeRole::Input1, input)?;
        sched.set_format(group, NodeRole::Frame, output)?;
        if args.hdr {
            sched.set_capture_mode(group, CaptureMode::StaggeredHdr)?;
        }
    }

    let roles = streamed_roles(&sched, 0, args.stats)?;
    info!(
        "{} groups, streaming {:?}, {} frames each",
        args.groups, roles, args.frames
    );

    let stop = Arc::new(AtomicBool::new(false));
    let hardware = spawn_hardware(
        sim.clone(),
        sched.clone(),
        trigger_rx,
        roles.contains(&NodeRole::Stats),
        Duration::from_micros(args.frame_time),
        stop.clone(),
    )?;

    let events = event_rx.to_async();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            trace!("frame sync group {} sequence {}", event.group, event.sequence);
        }
    });

    let mut next_addr = 0x4000_0000u64;
    for group in 0..args.groups {
        for role in roles.iter().copied() {
            let count = sched.queue_setup(group, role, args.buffers)?;
            for buffer in allocate(&sched, group, role, count, &params, &mut next_addr)? {
                sched.queue_buffer(group, role, buffer)?;
            }
        }
        for role in roles.iter().copied() {
            sched.start_streaming(group, role)?;
        }
    }

    let start = Instant::now();
    let completed = buf_rx.to_async();
    let mut frames = vec![0u32; args.groups];
    let mut errors = 0u32;
    while frames.iter().any(|f| *f < args.frames) {
        let done = match tokio::time::timeout(STALL_TIMEOUT, completed.recv()).await {
            Ok(Ok(done)) => done,
            Ok(Err(_)) => break,
            Err(_) => {
                warn!("no buffer completed for {:?}, stopping", STALL_TIMEOUT);
                break;
            }
        };

        let CompletedBuffer {
            group,
            role,
            mut buffer,
        } = done;
        if role == NodeRole::Frame {
            match buffer.state() {
                BufferState::Done => frames[group] += 1,
                _ => errors += 1,
            }
            if let Some(client) = tracy_client::Client::running() {
                client.frame_mark();
            }
            debug!(
                "group {} frame {} at {} ns",
                group,
                buffer.sequence(),
                buffer.timestamp_ns()
            );
        }

        if frames[group] < args.frames {
            buffer.requeue();
            sched.queue_buffer(group, role, buffer)?;
        }
    }
    let elapsed = start.elapsed();

    let stopper = sched.clone();
    let groups = args.groups;
    let dropped = tokio::task::spawn_blocking(move || -> Result<usize, IspError> {
        let mut dropped = 0;
        for group in 0..groups {
            for role in roles.iter().copied() {
                dropped += stopper.stop_streaming(group, role)?;
            }
        }
        Ok(dropped)
    })
    .await??;

    stop.store(true, Ordering::Release);
    if hardware.join().is_err() {
        error!("hardware thread panicked");
    }

    let total: u32 = frames.iter().sum();
    info!(
        "{} frames in {:?} ({:.1} fps), {} errors, {} buffers dropped at stop",
        total,
        elapsed,
        total as f64 / elapsed.as_secs_f64(),
        errors,
        dropped
    );
    for group in 0..args.groups {
        info!("group {}: next sequence {}", group, sched.frame_sequence(group)?);
    }
    info!(
        "{} triggers, {} overlapping, interrupts {}",
        sim.triggers(),
        sim.overlapping_triggers(),
        if sched.interrupts_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );
    Ok(())
}
