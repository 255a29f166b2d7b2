//! Probe compiler and loader
//!
//! Turns generated probe source into a BPF object (through an external
//! compiler, or a prebuilt object on disk), loads it with aya, attaches the
//! entry program to its tracepoint and hands out the per-family perf
//! channels under their generated names.

use anyhow::{bail, Context, Result};
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData},
    programs::TracePoint,
    Bpf,
};
use log::{debug, info};
use sockprobe_common::Family;
use sockprobe_kernel::ProbeSource;
use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

/// Turns probe source into a loadable BPF object
pub trait ProbeCompiler {
    /// Compile `source`, returning the object file bytes
    fn compile(&self, source: &ProbeSource) -> Result<Vec<u8>>;
}

/// Runs an external command as `<command...> <source.c> <object.o>`
pub struct CommandCompiler {
    command: Vec<String>,
    work_dir: PathBuf,
}

impl CommandCompiler {
    /// Create a compiler writing its intermediate files under `work_dir`
    pub fn new(command: Vec<String>, work_dir: PathBuf) -> Result<Self> {
        if command.is_empty() {
            bail!("No probe compiler configured. Set compiler.command or use --object-dir");
        }
        Ok(Self { command, work_dir })
    }

    fn paths(&self, source: &ProbeSource) -> (PathBuf, PathBuf) {
        let entry = source.symbols.entry();
        (
            self.work_dir.join(format!("{entry}.c")),
            self.work_dir.join(format!("{entry}.o")),
        )
    }
}

impl ProbeCompiler for CommandCompiler {
    fn compile(&self, source: &ProbeSource) -> Result<Vec<u8>> {
        fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("Failed to create work directory: {:?}", self.work_dir))?;

        let (src_path, obj_path) = self.paths(source);
        fs::write(&src_path, &source.text)
            .with_context(|| format!("Failed to write probe source: {:?}", src_path))?;

        debug!("Compiling {:?} with {:?}", src_path, self.command);
        let output = Command::new(&self.command[0])
            .args(&self.command[1..])
            .arg(&src_path)
            .arg(&obj_path)
            .output()
            .with_context(|| format!("Failed to run probe compiler {:?}", self.command[0]))?;

        if !output.status.success() {
            bail!(
                "Probe compiler failed for {} ({}): {}",
                source.symbols.entry(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        fs::read(&obj_path)
            .with_context(|| format!("Failed to read compiled object: {:?}", obj_path))
    }
}

/// Reads `<dir>/<entry>.o` compiled ahead of time
pub struct PrebuiltObjects {
    dir: PathBuf,
}

impl PrebuiltObjects {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn object_path(&self, source: &ProbeSource) -> PathBuf {
        self.dir.join(format!("{}.o", source.symbols.entry()))
    }
}

impl ProbeCompiler for PrebuiltObjects {
    fn compile(&self, source: &ProbeSource) -> Result<Vec<u8>> {
        let path = self.object_path(source);
        info!("Loading eBPF object from: {:?}", path);
        fs::read(&path).with_context(|| format!("Failed to read eBPF object file: {:?}", path))
    }
}

/// One loaded probe instance
pub struct ProbeLoader {
    ebpf: Bpf,
    source: ProbeSource,
}

impl ProbeLoader {
    /// Load a compiled probe
    ///
    /// # Arguments
    ///
    /// * `object` - BPF object compiled from `source`
    /// * `source` - Generated source, used for symbol names
    pub fn load(object: &[u8], source: ProbeSource) -> Result<Self> {
        info!("Loading eBPF program {}...", source.symbols.entry());

        let ebpf = Bpf::load(object)
            .with_context(|| format!("Failed to load eBPF program {}", source.symbols.entry()))?;

        Ok(Self { ebpf, source })
    }

    /// Compile `source` with `compiler` and load the result
    pub fn compile_and_load(compiler: &dyn ProbeCompiler, source: ProbeSource) -> Result<Self> {
        let object = compiler.compile(&source)?;
        Self::load(&object, source)
    }

    /// Attach the entry program to `category:name`
    pub fn attach(&mut self, category: &str, name: &str) -> Result<()> {
        let entry = self.source.symbols.entry();

        let program: &mut TracePoint = self
            .ebpf
            .program_mut(&entry)
            .with_context(|| format!("{entry} program not found in eBPF object"))?
            .try_into()
            .with_context(|| format!("Failed to get {entry} as TracePoint"))?;
        program
            .load()
            .with_context(|| format!("Failed to load {entry}"))?;
        program
            .attach(category, name)
            .with_context(|| format!("Failed to attach {entry} to {category}:{name}"))?;

        info!("  ✓ Attached {} to {}:{}", entry, category, name);
        Ok(())
    }

    /// Take the perf channel of every emitted family
    pub fn take_channels(&mut self) -> Result<Vec<(Family, AsyncPerfEventArray<MapData>)>> {
        let mut channels = Vec::new();

        for (family, name) in self.source.channels() {
            let map = self
                .ebpf
                .take_map(&name)
                .with_context(|| format!("{name} map not found in eBPF object"))?;
            let array = AsyncPerfEventArray::try_from(map)
                .with_context(|| format!("Failed to create AsyncPerfEventArray from {name} map"))?;
            channels.push((family, array));
        }

        Ok(channels)
    }
}

/// Write every source to `dir` as `<entry>.c`, for compiling ahead of time
pub fn write_sources(dir: &Path, sources: &[ProbeSource]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;

    sources
        .iter()
        .map(|source| {
            let path = dir.join(format!("{}.c", source.symbols.entry()));
            fs::write(&path, &source.text)
                .with_context(|| format!("Failed to write probe source: {:?}", path))?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockprobe_common::{FieldDescriptor, ProbeSpec, Tracepoint};
    use sockprobe_kernel::synthesize;

    fn source(suffix: &str) -> ProbeSource {
        let mut spec = ProbeSpec::new(suffix, Tracepoint::inet_sock_set_state());
        spec.fields4 = vec![FieldDescriptor::new("pid", "u32", "bpf_get_current_pid_tgid", false)];
        synthesize(&spec)
    }

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sockprobe-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_command_compiler_requires_command() {
        assert!(CommandCompiler::new(Vec::new(), scratch("empty")).is_err());
    }

    #[test]
    fn test_command_compiler_runs_command() {
        let dir = scratch("cp");
        // `cp <src> <obj>` stands in for a real compiler
        let compiler = CommandCompiler::new(vec!["cp".to_string()], dir.clone()).unwrap();
        let source = source("_7");

        let object = compiler.compile(&source).unwrap();
        assert_eq!(object, source.text.as_bytes());

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_command_compiler_failure() {
        let compiler = CommandCompiler::new(vec!["false".to_string()], scratch("false")).unwrap();
        let err = compiler.compile(&source("_8")).unwrap_err();

        assert!(err.to_string().contains("sk_trace_8"));
    }

    #[test]
    fn test_prebuilt_objects() {
        let dir = scratch("prebuilt");
        let source = source("_9");
        let written = write_sources(&dir, std::slice::from_ref(&source)).unwrap();
        assert_eq!(written, vec![dir.join("sk_trace_9.c")]);

        let objects = PrebuiltObjects::new(dir.clone());
        assert_eq!(objects.object_path(&source), dir.join("sk_trace_9.o"));
        assert!(objects.compile(&source).is_err());

        fs::write(objects.object_path(&source), b"\x7fELF").unwrap();
        assert_eq!(objects.compile(&source).unwrap(), b"\x7fELF");

        fs::remove_dir_all(dir).ok();
    }
}
