//! Inference backend selection: CUDA when it can be used, CPU otherwise.

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch};

/// Execution backend a model session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceBackend {
    /// NVIDIA GPU via the CUDA execution provider.
    Cuda,
    /// ONNX Runtime's default CPU provider.
    Cpu,
}

impl InferenceBackend {
    pub fn name(&self) -> &'static str {
        match self {
            InferenceBackend::Cuda => "cuda",
            InferenceBackend::Cpu => "cpu",
        }
    }

    /// Execution providers to register on a session builder. CUDA registration
    /// is strict so that a broken GPU setup surfaces as an error instead of
    /// silently running on CPU.
    pub(crate) fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        match self {
            InferenceBackend::Cuda => {
                vec![CUDAExecutionProvider::default().build().error_on_failure()]
            }
            InferenceBackend::Cpu => Vec::new(),
        }
    }
}

/// Pick the accelerated backend when `prefer_gpu` is set and CUDA is usable.
pub fn select_backend(prefer_gpu: bool) -> InferenceBackend {
    select_with(prefer_gpu, || {
        CUDAExecutionProvider::default()
            .is_available()
            .map_err(|e| e.to_string())
    })
}

fn select_with(
    prefer_gpu: bool,
    probe: impl FnOnce() -> Result<bool, String>,
) -> InferenceBackend {
    if !prefer_gpu {
        tracing::info!("GPU disabled by configuration, using CPU backend");
        return InferenceBackend::Cpu;
    }

    match probe() {
        Ok(true) => {
            tracing::info!(backend = "cuda", "inference backend selected");
            InferenceBackend::Cuda
        }
        Ok(false) => {
            tracing::warn!("CUDA not available, falling back to CPU");
            InferenceBackend::Cpu
        }
        Err(error) => {
            tracing::warn!(%error, "CUDA probe failed, falling back to CPU");
            InferenceBackend::Cpu
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_disabled_skips_probe() {
        let backend = select_with(false, || panic!("probe must not run"));
        assert_eq!(backend, InferenceBackend::Cpu);
    }

    #[test]
    fn test_gpu_available() {
        assert_eq!(select_with(true, || Ok(true)), InferenceBackend::Cuda);
    }

    #[test]
    fn test_gpu_unavailable_falls_back() {
        assert_eq!(select_with(true, || Ok(false)), InferenceBackend::Cpu);
    }

    #[test]
    fn test_probe_error_falls_back() {
        let backend = select_with(true, || Err("libcudart.so not found".into()));
        assert_eq!(backend, InferenceBackend::Cpu);
    }

    #[test]
    fn test_cpu_registers_no_providers() {
        assert!(InferenceBackend::Cpu.execution_providers().is_empty());
        assert_eq!(InferenceBackend::Cuda.execution_providers().len(), 1);
        assert_eq!(InferenceBackend::Cuda.name(), "cuda");
    }
}
