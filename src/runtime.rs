//! Runtime: owns the heap and dispatches native calls
//!
//! The runtime is the embedding surface of the crate. It allocates object
//! cells through the collector, calls native functions (revivers, replacers,
//! `toJSON` methods) and fronts the JSON entry points.

use std::rc::Rc;

use crate::config::RuntimeConfig;
use crate::error::JsError;
use crate::gc::{GcStats, Guard, Heap};
use crate::json;
use crate::object::{ExoticObject, JsObject, JsObjectRef, NativeFunction, PropertyKey};
use crate::string::JsString;
use crate::value::{CheapClone, JsValue};

/// A single-threaded heap plus the configuration it runs under
pub struct Runtime {
    /// Objects the embedder asked to keep alive without holding a handle.
    /// Declared before the heap so it is released first.
    root_guard: Guard<JsObject>,
    heap: Heap<JsObject>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let heap = Heap::new();
        heap.set_gc_threshold(config.gc_threshold);
        heap.set_extra_memory_threshold(config.extra_memory_threshold);
        let root_guard = heap.create_guard();
        Self {
            root_guard,
            heap,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap<JsObject> {
        &self.heap
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Create an empty ordinary object
    pub fn create_object(&mut self) -> Result<JsObjectRef, JsError> {
        self.alloc(ExoticObject::Ordinary)
    }

    /// Create an array holding `elements` at indices `0..len`
    pub fn create_array(&mut self, elements: Vec<JsValue>) -> Result<JsObjectRef, JsError> {
        let array = self.alloc(ExoticObject::Array)?;
        {
            let mut obj = array.borrow_mut();
            if !elements.is_empty() {
                let len = u32::try_from(elements.len()).map_err(|_| JsError::out_of_memory())?;
                obj.ensure_length(len)?;
            }
            for (i, element) in (0u32..).zip(elements) {
                obj.put_index(i, element)?;
            }
        }
        self.report_butterfly_cost(&array);
        Ok(array)
    }

    /// Wrap a closure as a callable object
    pub fn create_function<F>(&mut self, name: &str, arity: usize, func: F) -> Result<JsObjectRef, JsError>
    where
        F: Fn(&mut Runtime, &JsValue, &[JsValue]) -> Result<JsValue, JsError> + 'static,
    {
        self.alloc(ExoticObject::Function(NativeFunction {
            name: JsString::from(name),
            func: Rc::new(func),
            arity,
        }))
    }

    /// Box a primitive (`new Number(1)` and friends). Other values are
    /// returned unchanged.
    pub fn create_boxed(&mut self, primitive: &JsValue) -> Result<JsValue, JsError> {
        let exotic = match primitive {
            JsValue::Boolean(b) => ExoticObject::BooleanObject(*b),
            JsValue::Int32(i) => ExoticObject::NumberObject(f64::from(*i)),
            JsValue::Double(n) => ExoticObject::NumberObject(*n),
            JsValue::String(s) => ExoticObject::StringObject(s.cheap_clone()),
            other => return Ok(other.clone()),
        };
        Ok(JsValue::Object(self.alloc(exotic)?))
    }

    fn alloc(&mut self, exotic: ExoticObject) -> Result<JsObjectRef, JsError> {
        // The handle keeps the cell alive once the scratch guard is gone.
        let cell = self.heap.create_guard().alloc()?;
        cell.borrow_mut().exotic = exotic;
        Ok(cell)
    }

    // ------------------------------------------------------------------
    // Property helpers
    // ------------------------------------------------------------------

    /// Own property lookup; missing properties read as `undefined`
    pub fn get(&self, obj: &JsObjectRef, key: impl Into<PropertyKey>) -> JsValue {
        obj.borrow().get_own(&key.into()).unwrap_or(JsValue::Undefined)
    }

    /// Store a property, reporting any butterfly growth to the collector
    pub fn set(&mut self, obj: &JsObjectRef, key: impl Into<PropertyKey>, value: JsValue) -> Result<bool, JsError> {
        let stored = obj.borrow_mut().put(key.into(), value)?;
        self.report_butterfly_cost(obj);
        Ok(stored)
    }

    pub(crate) fn report_butterfly_cost(&self, obj: &JsObjectRef) {
        let bytes = obj.borrow().butterfly().map_or(0, |b| b.allocation_size());
        if bytes > 0 {
            self.heap.report_extra_memory_cost(bytes);
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Call `func` with `this` and `args`
    pub fn call(&mut self, func: &JsValue, this: &JsValue, args: &[JsValue]) -> Result<JsValue, JsError> {
        let native = match func {
            JsValue::Object(obj) => match &obj.borrow().exotic {
                ExoticObject::Function(f) => Some(f.func.clone()),
                _ => None,
            },
            _ => None,
        };
        match native {
            Some(f) => f(self, this, args),
            None => Err(JsError::type_error(format!("{} is not a function", func.type_of()))),
        }
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// Flatten a rope, charging the new buffer to the collector
    pub fn resolve_string(&self, s: &JsString) -> Result<(), JsError> {
        let bytes = s.resolve()?;
        if bytes > 0 {
            self.heap.report_extra_memory_cost(bytes);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // JSON
    // ------------------------------------------------------------------

    /// `JSON.parse(text, reviver)`
    pub fn json_parse(&mut self, text: &str, reviver: Option<&JsValue>) -> Result<JsValue, JsError> {
        json::parse(self, text, reviver)
    }

    /// `JSON.stringify(value, replacer, space)`; `undefined` when the value
    /// has no JSON representation
    pub fn json_stringify(&mut self, value: &JsValue, replacer: &JsValue, space: &JsValue) -> Result<JsValue, JsError> {
        json::stringify(self, value, replacer, space)
    }

    // ------------------------------------------------------------------
    // Collector
    // ------------------------------------------------------------------

    /// Keep `value` alive until [`unprotect`](Self::unprotect)
    pub fn protect(&mut self, value: &JsValue) {
        if let JsValue::Object(obj) = value {
            self.root_guard.guard(obj);
        }
    }

    pub fn unprotect(&mut self, value: &JsValue) -> bool {
        match value {
            JsValue::Object(obj) => self.root_guard.unguard(obj),
            _ => false,
        }
    }

    /// Run garbage collection manually
    pub fn collect_garbage(&mut self) {
        self.heap.collect();
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
