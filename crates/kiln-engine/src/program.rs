//! Program modules
//!
//! A [`ProgramModule`] is the fully-typed form of a kiln module: a class
//! type with resolved methods, the constant table those methods reference,
//! and the object's attribute state. Methods run by lowering the class on
//! first call and interpreting the result.

use crate::compiler::{self, lower_class, ClassType, CompileError};
use crate::config::CompilationOptions;
use crate::minimal::MinimalModule;
use crate::serialize::{ExtraFiles, OwnedBuffer};
use crate::vm::{Interpreter, Value, VmError, VmResult};
use kiln_bytecode::{get_root, Device, BYTECODE_VERSION};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Fully-typed executable module
#[derive(Debug)]
pub struct ProgramModule {
    class: ClassType,
    constants: Vec<Value>,
    state: RwLock<Vec<Value>>,
    /// Executable form, built on first call
    lowered: OnceLock<MinimalModule>,
    sources: BTreeMap<String, String>,
    /// Buffer the module was loaded from
    backing: Option<OwnedBuffer>,
}

impl ProgramModule {
    /// Compile a module from source at the current bytecode version
    ///
    /// Attributes start out as `None`.
    pub fn from_source(source: &str, constants: Vec<Value>) -> Result<Self, CompileError> {
        let class = compiler::compile_source(source, constants.len(), BYTECODE_VERSION)?;
        let state = vec![Value::None; class.attributes.len()];
        let mut sources = BTreeMap::new();
        sources.insert(compiler::source_path(&class), source.to_string());
        Ok(Self::from_parts(class, constants, state, sources, None))
    }

    pub(crate) fn from_parts(
        class: ClassType,
        constants: Vec<Value>,
        state: Vec<Value>,
        sources: BTreeMap<String, String>,
        backing: Option<OwnedBuffer>,
    ) -> Self {
        Self {
            class,
            constants,
            state: RwLock::new(state),
            lowered: OnceLock::new(),
            sources,
            backing,
        }
    }

    /// Class-type descriptor
    pub fn class_type(&self) -> &ClassType {
        &self.class
    }

    /// Method names, in declaration order
    pub fn method_names(&self) -> Vec<&str> {
        self.class.methods.iter().map(|m| m.name.as_str()).collect()
    }

    /// Constant table referenced by `CONSTANTS.cN`
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Current value of an attribute
    pub fn attr(&self, name: &str) -> Option<Value> {
        let index = self.class.attribute_index(name)?;
        self.state.read().get(index).cloned()
    }

    /// Set an attribute
    pub fn set_attr(&self, name: &str, value: Value) -> VmResult<()> {
        let index = self
            .class
            .attribute_index(name)
            .ok_or_else(|| VmError::UnknownAttribute(name.to_string()))?;
        if let Some(slot) = self.state.write().get_mut(index) {
            *slot = value;
        }
        Ok(())
    }

    /// Copy of all attribute values, in slot order
    pub fn state_snapshot(&self) -> Vec<Value> {
        self.state.read().clone()
    }

    /// Source files the module was compiled from
    pub fn sources(&self) -> &BTreeMap<String, String> {
        &self.sources
    }

    /// Text of one embedded source file
    pub fn embedded_source(&self, path: &str) -> Option<&str> {
        self.sources.get(path).map(String::as_str)
    }

    /// Buffer the module was loaded from, if any
    pub fn backing_buffer(&self) -> Option<&OwnedBuffer> {
        self.backing.as_ref()
    }

    /// Auxiliary files of the buffer the module was loaded from
    ///
    /// Re-read from the backing buffer on each call; `None` for modules that
    /// were not loaded from a buffer.
    pub fn extra_files(&self) -> Option<ExtraFiles> {
        let backing = self.backing.as_ref()?;
        let root = get_root(backing.as_slice()).ok()?;
        let files = root.extra_files().ok()?;
        Some(
            files
                .into_iter()
                .map(|(name, data)| (name.to_string(), data.to_vec()))
                .collect(),
        )
    }

    fn executable(&self) -> VmResult<&MinimalModule> {
        if let Some(lowered) = self.lowered.get() {
            return Ok(lowered);
        }
        let lowered = lower_class(
            &self.class,
            &self.constants,
            &[],
            &CompilationOptions::permissive(),
        )
        .map_err(|e| VmError::Compile(e.to_string()))?;
        // A concurrent caller may have won the race; both results are identical
        let _ = self.lowered.set(lowered);
        self.lowered
            .get()
            .ok_or_else(|| VmError::Compile("lowering was not cached".to_string()))
    }

    /// Run a method
    pub fn call(&self, method: &str, args: &[Value]) -> VmResult<Value> {
        let index = self
            .class
            .method_index(method)
            .ok_or_else(|| VmError::UnknownMethod(method.to_string()))?;
        let lowered = self.executable()?;
        let mut state = self.state.write();
        Interpreter::new(&lowered.functions, &lowered.constants, &mut state)?
            .call(index, args.to_vec())
    }

    /// Place every constant and attribute tensor on `device`
    pub fn to_device(&mut self, device: Device) {
        for value in self.constants.iter_mut().chain(self.state.get_mut().iter_mut()) {
            *value = value.to_device(device);
        }
        self.lowered = OnceLock::new();
    }
}
