//! In-process compile pipeline: read → transform → write.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::block_in_place;
use tokio_util::sync::CancellationToken;

use crate::error::CompileError;
use crate::job::CompileJob;
use crate::plugin::{CompilerPlugin, TransformResult};

/// Stage of one library-mode compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    Reading,
    Transforming,
    Writing,
    Done,
    Failed,
}

struct Pipeline<'a> {
    job: &'a CompileJob,
    stage: CompileStage,
}

impl<'a> Pipeline<'a> {
    fn new(job: &'a CompileJob) -> Self {
        Self {
            job,
            stage: CompileStage::Reading,
        }
    }

    fn advance(&mut self, next: CompileStage) {
        tracing::debug!(
            source = %self.job.source.display(),
            from = ?self.stage,
            to = ?next,
            "compile stage"
        );
        self.stage = next;
    }

    fn fail(&mut self, error: CompileError) -> CompileError {
        self.advance(CompileStage::Failed);
        error
    }

    fn check_cancelled(&mut self, cancel: &CancellationToken) -> Result<(), CompileError> {
        if cancel.is_cancelled() {
            return Err(self.fail(CompileError::Cancelled {
                path: self.job.source.clone(),
            }));
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "compiler panicked".to_string()
    }
}

/// Run a transform, turning both errors and panics into a compile failure.
pub fn run_transform<F>(transform: F, source: &Path) -> Result<String, CompileError>
where
    F: FnOnce() -> TransformResult,
{
    match catch_unwind(AssertUnwindSafe(transform)) {
        Ok(Ok(compiled)) => Ok(compiled),
        Ok(Err(e)) => Err(CompileError::transform(source, e.to_string())),
        Err(payload) => Err(CompileError::transform(source, panic_message(payload.as_ref()))),
    }
}

/// Run a transform, moving this worker's other tasks elsewhere first when
/// the runtime has threads to spare. A current-thread runtime runs it inline.
fn transform_in_place<F>(transform: F, source: &Path) -> Result<String, CompileError>
where
    F: FnOnce() -> TransformResult,
{
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => block_in_place(|| run_transform(transform, source)),
        _ => run_transform(transform, source),
    }
}

/// Compile `job` through `plugin.compile_source`.
pub async fn compile_with_library<P>(
    plugin: &P,
    job: &CompileJob,
    cancel: &CancellationToken,
) -> Result<(), CompileError>
where
    P: CompilerPlugin + ?Sized,
{
    let mut pipeline = Pipeline::new(job);
    pipeline.check_cancelled(cancel)?;

    let code = match tokio::fs::read_to_string(&job.source).await {
        Ok(code) => code,
        Err(source) => {
            return Err(pipeline.fail(CompileError::Read {
                path: job.source.clone(),
                source,
            }))
        }
    };

    pipeline.advance(CompileStage::Transforming);
    let base_name = job.base_name();
    let compiled = match transform_in_place(
        || plugin.compile_source(&code, &base_name, &job.settings),
        &job.source,
    ) {
        Ok(compiled) => compiled,
        Err(e) => return Err(pipeline.fail(e)),
    };

    pipeline.check_cancelled(cancel)?;
    pipeline.advance(CompileStage::Writing);
    if let Err(source) = tokio::fs::write(&job.output, compiled).await {
        return Err(pipeline.fail(CompileError::Write {
            path: job.source.clone(),
            output: job.output.clone(),
            source,
        }));
    }

    pipeline.advance(CompileStage::Done);
    Ok(())
}
