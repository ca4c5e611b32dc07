use std::time::Instant;

use tracing::trace;
use wasmtime::{Store, StoreLimits, UpdateDeadline};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::WasiCtxBuilder;

use super::host::CompiledModule;
use super::outcome::{classify, EvaluationResult, Interrupt};

/// Per-store data: the WASI context plus everything the host checks
/// while the guest runs.
pub(crate) struct InstanceState {
    pub(crate) wasi: WasiP1Ctx,
    limits: StoreLimits,
    deadline: Instant,
}

/// One throwaway guest: its own store, linear memory and streams.
///
/// Dropping it releases the store, on whichever path the evaluation ends,
/// including when the future driving [`ExecutionInstance::execute`] is
/// dropped mid-run.
pub(crate) struct ExecutionInstance {
    module: CompiledModule,
    store: Store<InstanceState>,
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
}

impl ExecutionInstance {
    pub(crate) fn new(
        module: &CompiledModule,
        source: String,
        memory_limit_pages: u32,
        deadline: Instant,
    ) -> Self {
        let stdout = MemoryOutputPipe::new(module.max_output_bytes());
        let stderr = MemoryOutputPipe::new(module.max_output_bytes());

        // Clocks, sleep and random come from the builder defaults;
        // no preopens, env, args or sockets are granted.
        let wasi = WasiCtxBuilder::new()
            .stdin(MemoryInputPipe::new(source))
            .stdout(stdout.clone())
            .stderr(stderr.clone())
            .build_p1();

        let state = InstanceState {
            wasi,
            limits: module.store_limits(memory_limit_pages),
            deadline,
        };

        let mut store = Store::new(module.engine(), state);
        store.limiter(|state| &mut state.limits);
        store.set_epoch_deadline(1);
        // Every tick the guest yields to the executor, so a dropped future
        // or an elapsed timer is noticed even by a tight loop.
        store.epoch_deadline_callback(|ctx| {
            if Instant::now() >= ctx.data().deadline {
                Err(Interrupt::DeadlineExceeded.into())
            } else {
                Ok(UpdateDeadline::Yield(1))
            }
        });

        module.instance_created();
        trace!("Execution instance created ({} live)", module.live_instances());

        Self {
            module: module.clone(),
            store,
            stdout,
            stderr,
        }
    }

    /// Instantiates the guest (running its start section) and calls `_start`
    /// when the module exports one.
    async fn run(&mut self) -> anyhow::Result<()> {
        let instance = self
            .module
            .instance_pre()
            .instantiate_async(&mut self.store)
            .await?;
        if let Some(start) = instance.get_func(&mut self.store, "_start") {
            start
                .typed::<(), ()>(&self.store)?
                .call_async(&mut self.store, ())
                .await?;
        }
        Ok(())
    }

    /// Runs the guest to completion or interruption, releases the instance
    /// and classifies what it left behind.
    pub(crate) async fn execute(mut self) -> EvaluationResult {
        let outcome = self.run().await;
        let stdout = self.stdout.contents();
        let stderr = self.stderr.contents();
        drop(self);
        classify(outcome, &stdout, &stderr)
    }
}

impl Drop for ExecutionInstance {
    fn drop(&mut self) {
        self.module.instance_released();
        trace!("Execution instance released ({} live)", self.module.live_instances());
    }
}
