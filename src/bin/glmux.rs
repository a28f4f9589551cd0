use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use glmux::{
    CallId, ClientId, ClientPort, GlmuxResult, HandleRef, Multiplexer, MuxOpts, MuxStats,
    ProxyMessage, RecordingContext,
};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "glmux", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive synthetic clients against an in-memory context and print a JSON summary.
    Simulate(SimulateArgs),
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Number of synthetic clients.
    #[arg(long, default_value_t = 15)]
    clients: usize,

    /// Number of frame cycles to run.
    #[arg(long, default_value_t = 60)]
    cycles: u64,

    /// Multiplexer options JSON (camelCase keys, all optional).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Participants per cycle.
    #[arg(long)]
    capacity: Option<usize>,

    /// Sampler seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Frame deadline in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pause between cycles in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Delay before the first cycle in milliseconds.
    #[arg(long)]
    start_delay_ms: Option<u64>,

    /// Draw calls each client issues per frame.
    #[arg(long, default_value_t = 2)]
    draws: u32,
}

#[derive(serde::Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Summary {
    clients: usize,
    capacity: usize,
    stats: MuxStats,
    sampled: BTreeMap<ClientId, u64>,
    frames_produced: BTreeMap<ClientId, u64>,
    context_invocations: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Simulate(args) => cmd_simulate(args),
    }
}

fn read_opts_json(path: &Path) -> anyhow::Result<MuxOpts> {
    let f = File::open(path).with_context(|| format!("open options '{}'", path.display()))?;
    let opts: MuxOpts = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parse options JSON '{}'", path.display()))?;
    Ok(opts)
}

fn cmd_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let mut opts = match &args.config {
        Some(path) => read_opts_json(path)?,
        None => MuxOpts::default(),
    };
    if let Some(v) = args.capacity {
        opts.capacity = v;
    }
    if let Some(v) = args.seed {
        opts.seed = Some(v);
    }
    if let Some(v) = args.timeout_ms {
        opts.frame_timeout_ms = v;
    }
    if let Some(v) = args.interval_ms {
        opts.frame_interval_ms = v;
    }
    if let Some(v) = args.start_delay_ms {
        opts.start_delay_ms = v;
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    let summary = rt.block_on(simulate(opts, args.clients, args.cycles, args.draws))?;
    let out = serde_json::to_string_pretty(&summary).context("serialize summary")?;
    println!("{out}");
    Ok(())
}

async fn simulate(
    opts: MuxOpts,
    clients: usize,
    cycles: u64,
    draws: u32,
) -> anyhow::Result<Summary> {
    let capacity = opts.capacity;
    let (mut mux, handle) = Multiplexer::new(RecordingContext::webgl_like(), opts)
        .context("invalid multiplexer options")?;

    let mut tasks = Vec::with_capacity(clients);
    for i in 0..clients {
        let port = handle
            .register(format!("client-{i}"))
            .context("register synthetic client")?;
        tasks.push(tokio::spawn(synthetic_client(port, draws)));
    }

    let stats = mux.run_until(Some(cycles)).await;
    let sampled = mux
        .registry()
        .iter()
        .map(|p| (p.client_id(), p.stats().sampled))
        .collect();
    let context_invocations = mux.host().context().invocations().len();

    // Dropping the multiplexer closes every client endpoint, which ends the client tasks.
    drop(mux);
    drop(handle);

    let mut frames_produced = BTreeMap::new();
    for task in tasks {
        let (id, frames) = task.await.context("synthetic client panicked")?;
        if let Some(id) = id {
            frames_produced.insert(id, frames);
        }
    }

    Ok(Summary {
        clients,
        capacity,
        stats,
        sampled,
        frames_produced,
        context_invocations,
    })
}

/// Sets up a program and a buffer once, then answers every frame request with a small draw
/// batch. Also tries a forbidden `clear` once, which the proxy must reject.
struct SyntheticClient {
    draws: u32,
    next_call: u64,
    constants: HashMap<String, f64>,
    buffer: Option<HandleRef>,
    frames: u64,
}

impl SyntheticClient {
    fn call_id(&mut self) -> CallId {
        self.next_call += 1;
        CallId(self.next_call)
    }

    fn constant(&self, name: &str) -> f64 {
        self.constants.get(name).copied().unwrap_or(0.0)
    }

    fn on_message(&mut self, port: &ClientPort, msg: ProxyMessage) -> GlmuxResult<()> {
        match msg {
            ProxyMessage::Assigned { .. } | ProxyMessage::Reply { .. } => {}
            ProxyMessage::Bootstrap { constants, .. } => {
                self.constants = constants.into_iter().collect();

                let program = self.call_id();
                port.call(program, "createProgram", vec![])?;
                let buf = self.call_id();
                port.call(buf, "createBuffer", vec![])?;
                self.buffer = Some(HandleRef::new(buf));
                let id = self.call_id();
                port.call(id, "useProgram", vec![HandleRef::new(program).into()])?;

                let mask = self.constant("COLOR_BUFFER_BIT") as u64;
                let id = self.call_id();
                port.call(id, "clear", vec![json!(mask).into()])?;
            }
            ProxyMessage::ProduceFrame { frame, .. } => {
                if let Some(buf) = self.buffer {
                    let id = self.call_id();
                    let target = self.constant("ARRAY_BUFFER");
                    port.call(id, "bindBuffer", vec![json!(target).into(), buf.into()])?;
                }
                let triangles = self.constant("TRIANGLES");
                for i in 0..self.draws {
                    let id = self.call_id();
                    let args = vec![json!(triangles).into(), json!(i * 3).into(), json!(3).into()];
                    port.call(id, "drawArrays", args)?;
                }
                port.frame_end()?;
                self.frames += 1;
                tracing::trace!(client = ?port.client_id(), frame = frame.0, "frame produced");
            }
        }
        Ok(())
    }
}

async fn synthetic_client(mut port: ClientPort, draws: u32) -> (Option<ClientId>, u64) {
    let mut client = SyntheticClient {
        draws,
        next_call: 0,
        constants: HashMap::new(),
        buffer: None,
        frames: 0,
    };
    while let Some(msg) = port.recv().await {
        if let Err(e) = client.on_message(&port, msg) {
            tracing::debug!(client = ?port.client_id(), error = %e, "synthetic client stopping");
            break;
        }
    }
    (port.client_id(), client.frames)
}
