//! Minimal modules
//!
//! The executable form of a portable module: bytecode functions, constants
//! and attribute state, without the class-type metadata of a
//! [`ProgramModule`](crate::ProgramModule).

use crate::vm::{Interpreter, Value, VmError, VmResult};
use kiln_bytecode::{Attribute, ConstantPool, DebugInfo, Device, Function, Module};

/// Executable module
#[derive(Debug, Clone, PartialEq)]
pub struct MinimalModule {
    /// Class name of the module object
    pub class_name: String,
    /// Constant pool
    pub constants: Vec<Value>,
    /// Functions, one per method
    pub functions: Vec<Function>,
    /// Attribute names, in slot order
    pub attributes: Vec<String>,
    /// Attribute values, parallel to `attributes`
    pub state: Vec<Value>,
    /// Line tables, when retained
    pub debug_info: Option<DebugInfo>,
}

impl MinimalModule {
    /// Build from a decoded module
    pub fn from_module(module: &Module) -> Self {
        Self {
            class_name: module.class_name.clone(),
            constants: module.constants.values.iter().map(Value::from_constant).collect(),
            functions: module.functions.clone(),
            attributes: module.state.iter().map(|a| a.name.clone()).collect(),
            state: module
                .state
                .iter()
                .map(|a| Value::from_constant(&a.value))
                .collect(),
            debug_info: module.debug_info.clone(),
        }
    }

    /// Container form at the current bytecode version
    ///
    /// Sources and extra files are left empty for the caller to fill in.
    pub fn to_module(&self) -> Module {
        let mut module = Module::new(self.class_name.clone());
        module.constants = ConstantPool::from(
            self.constants
                .iter()
                .map(Value::to_constant)
                .collect::<Vec<_>>(),
        );
        module.functions = self.functions.clone();
        module.state = self
            .attributes
            .iter()
            .zip(&self.state)
            .map(|(name, value)| Attribute {
                name: name.clone(),
                value: value.to_constant(),
            })
            .collect();
        module.debug_info = self.debug_info.clone();
        module
    }

    /// Index of a function by name
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Current value of an attribute
    pub fn attr(&self, name: &str) -> Option<&Value> {
        let index = self.attributes.iter().position(|a| a == name)?;
        self.state.get(index)
    }

    /// Run a method; attribute stores persist in the module
    pub fn call(&mut self, method: &str, args: Vec<Value>) -> VmResult<Value> {
        let index = self
            .function_index(method)
            .ok_or_else(|| VmError::UnknownMethod(method.to_string()))?;
        Interpreter::new(&self.functions, &self.constants, &mut self.state)?.call(index, args)
    }

    /// Place every tensor constant and attribute on `device`
    pub fn to_device(&mut self, device: Device) {
        for value in self.constants.iter_mut().chain(self.state.iter_mut()) {
            *value = value.to_device(device);
        }
    }

    /// Source location of an instruction, when line tables were retained
    pub fn location(&self, function: usize, offset: u32) -> Option<(u32, u32)> {
        self.debug_info
            .as_ref()?
            .functions
            .get(function)?
            .location(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile_source, lower_class};
    use crate::config::CompilationOptions;
    use kiln_bytecode::{Tensor, BYTECODE_VERSION};

    fn counter() -> MinimalModule {
        let class = compile_source(
            "class Counter {
                attr count;
                attr weights;
                def bump(self, by) { self.count = self.count + by; return self.count; }
                def scaled(self) { return self.weights * CONSTANTS.c0; }
            }",
            1,
            BYTECODE_VERSION,
        )
        .unwrap();
        lower_class(
            &class,
            &[Value::Float(2.0)],
            &[Value::Int(0), Value::from(Tensor::from_vec(vec![1.0, 2.0]))],
            &CompilationOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_state_persists_between_calls() {
        let mut module = counter();
        assert_eq!(module.call("bump", vec![Value::Int(2)]).unwrap(), Value::Int(2));
        assert_eq!(module.call("bump", vec![Value::Int(3)]).unwrap(), Value::Int(5));
        assert_eq!(module.attr("count"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_unknown_method() {
        let mut module = counter();
        assert_eq!(
            module.call("missing", vec![]),
            Err(VmError::UnknownMethod("missing".to_string()))
        );
    }

    #[test]
    fn test_module_conversion() {
        let module = counter();
        let back = MinimalModule::from_module(&module.to_module());
        assert_eq!(back, module);
    }

    #[test]
    fn test_to_device() {
        let mut module = counter();
        module.to_device(Device::Cuda(0));
        let weights = module.attr("weights").unwrap().as_tensor().unwrap();
        assert_eq!(weights.device, Device::Cuda(0));
        let result = module.call("scaled", vec![]).unwrap();
        assert_eq!(result.as_tensor().unwrap().data, vec![2.0, 4.0]);
    }
}
