use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, InstancePre, Linker, Module, StoreLimits, StoreLimitsBuilder};

use super::instance::InstanceState;
use super::loader::BytecodeImage;

/// Size of one WebAssembly linear-memory page.
pub const WASM_PAGE_BYTES: u64 = 64 * 1024;

/// Largest page count a 32-bit memory can address (4 GiB).
pub const MAX_MEMORY_PAGES: u32 = 65_536;

/// How long [`Sandbox::shutdown`] waits for running instances to finish.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to create wasm engine: {0:#}")]
    Engine(anyhow::Error),

    #[error("failed to install wasi_snapshot_preview1: {0:#}")]
    Wasi(anyhow::Error),

    #[error("failed to compile wasm module: {0:#}")]
    CompileFailed(anyhow::Error),

    #[error("failed to link wasm module against the host surface: {0:#}")]
    LinkFailed(anyhow::Error),

    #[error("failed to start epoch ticker: {0}")]
    Ticker(io::Error),
}

#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("epoch ticker thread panicked")]
    TickerPanicked,

    #[error("{0} execution instance(s) still running at shutdown")]
    InstancesInFlight(usize),
}

/// Host-wide settings fixed at initialization.
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Ceiling on every instance's linear memory, in 64 KiB pages. An
    /// evaluator may ask for less, never more.
    pub memory_limit_pages: u32,
    /// Capacity of each captured output stream.
    pub max_output_bytes: usize,
    /// How often running instances check their deadline and yield.
    pub epoch_tick: Duration,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            memory_limit_pages: 64 * 16,
            max_output_bytes: 8 * 1024 * 1024,
            epoch_tick: Duration::from_millis(10),
        }
    }
}

/// A wasm image compiled and pre-linked against the WASI surface.
///
/// Cloning is cheap and shares the same compiled code. The epoch ticker
/// lives exactly as long as the last handle, so an instance still running
/// after [`Sandbox::shutdown`] keeps being interrupted. Only
/// [`Sandbox::initialize`] constructs one.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Arc<ModuleInner>,
}

struct ModuleInner {
    engine: Engine,
    pre: InstancePre<InstanceState>,
    memory_ceiling_pages: u32,
    max_output_bytes: usize,
    live_instances: AtomicUsize,
    ticker: EpochTicker,
}

impl CompiledModule {
    pub(crate) fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub(crate) fn instance_pre(&self) -> &InstancePre<InstanceState> {
        &self.inner.pre
    }

    /// Host ceiling on instance memory, in pages.
    pub fn memory_ceiling_pages(&self) -> u32 {
        self.inner.memory_ceiling_pages
    }

    /// `pages` clamped to the host ceiling.
    pub fn effective_memory_pages(&self, pages: u32) -> u32 {
        pages.min(self.inner.memory_ceiling_pages)
    }

    pub(crate) fn store_limits(&self, pages: u32) -> StoreLimits {
        let bytes = u64::from(self.effective_memory_pages(pages)) * WASM_PAGE_BYTES;
        StoreLimitsBuilder::new()
            .memory_size(usize::try_from(bytes).unwrap_or(usize::MAX))
            .build()
    }

    pub fn max_output_bytes(&self) -> usize {
        self.inner.max_output_bytes
    }

    /// Number of instances created from this module and not yet released.
    pub fn live_instances(&self) -> usize {
        self.inner.live_instances.load(Ordering::Acquire)
    }

    pub(crate) fn instance_created(&self) {
        self.inner.live_instances.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn instance_released(&self) {
        self.inner.live_instances.fetch_sub(1, Ordering::AcqRel);
    }

    /// True when both handles share the same compiled code.
    pub fn same_module(&self, other: &CompiledModule) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Process-wide runtime context: engine, WASI linker and compiled module,
/// plus the epoch ticker that lets the host interrupt running instances.
pub struct Sandbox {
    module: CompiledModule,
}

impl Sandbox {
    /// Compiles `image` once and prepares the shared host surface.
    pub fn initialize(image: BytecodeImage, options: &SandboxOptions) -> Result<Self, HostError> {
        let mut config = Config::new();
        config.async_support(true);
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(HostError::Engine)?;

        let mut linker: Linker<InstanceState> = Linker::new(&engine);
        wasmtime_wasi::preview1::add_to_linker_async(&mut linker, |state| &mut state.wasi)
            .map_err(HostError::Wasi)?;

        let module =
            Module::from_binary(&engine, image.as_bytes()).map_err(HostError::CompileFailed)?;
        let pre = linker
            .instantiate_pre(&module)
            .map_err(HostError::LinkFailed)?;
        info!(
            "WASM module compiled successfully ({} bytes, up to {} memory pages per instance)",
            image.size_bytes(),
            options.memory_limit_pages
        );

        let ticker =
            EpochTicker::spawn(engine.clone(), options.epoch_tick).map_err(HostError::Ticker)?;

        Ok(Self {
            module: CompiledModule {
                inner: Arc::new(ModuleInner {
                    engine,
                    pre,
                    memory_ceiling_pages: options.memory_limit_pages.min(MAX_MEMORY_PAGES),
                    max_output_bytes: options.max_output_bytes,
                    live_instances: AtomicUsize::new(0),
                    ticker,
                }),
            },
        })
    }

    pub fn module(&self) -> CompiledModule {
        self.module.clone()
    }

    /// Waits (bounded) for running instances to be released, then lets go
    /// of the runtime context.
    ///
    /// The epoch ticker keeps running while anything still holds the
    /// module; it is stopped and joined here only when this is the last
    /// handle.
    pub async fn shutdown(self) -> Result<(), TeardownError> {
        let drained = tokio::time::timeout(SHUTDOWN_DRAIN, async {
            while self.module.live_instances() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        if drained.is_err() {
            let live = self.module.live_instances();
            warn!("{live} execution instance(s) did not finish within {SHUTDOWN_DRAIN:?}");
            return Err(TeardownError::InstancesInFlight(live));
        }

        match Arc::into_inner(self.module.inner) {
            Some(inner) => inner.ticker.stop()?,
            None => debug!("Compiled module still shared, epoch ticker stops with the last handle"),
        }
        debug!("Sandbox released");
        Ok(())
    }
}

/// Background thread advancing the engine epoch at a fixed rate.
struct EpochTicker {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn spawn(engine: Engine, tick: Duration) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("wasm-epoch".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => engine.increment_epoch(),
                    // Explicit stop or sender dropped
                    _ => break,
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    fn stop(mut self) -> Result<(), TeardownError> {
        drop(self.stop_tx.take());
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| TeardownError::TickerPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        // The thread sees the disconnect on its next wakeup and exits.
        drop(self.stop_tx.take());
    }
}
