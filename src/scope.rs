// src/scope.rs

//! Lexical environment of a program thread.
//!
//! A [`Scope`] is a stack of frames, innermost last. Blocks and loop
//! iterations push plain frames; function calls push a *function* frame,
//! which hides the caller's locals so lookups from inside the function see
//! only its own frames and the global frame.
//!
//! The whole scope is serializable: it is the variable half of a checkpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lang::{Type, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSymbol {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    pub value: Value,
}

impl ScopeSymbol {
    pub fn new(name: impl Into<String>, ty: Type, value: Value) -> Self {
        Self {
            name: name.into(),
            ty,
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub function: bool,
    pub symbols: BTreeMap<String, ScopeSymbol>,
}

impl Frame {
    pub fn function() -> Self {
        Self {
            function: true,
            symbols: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    frames: Vec<Frame>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// A scope holding only the (empty) global frame.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn push_function_frame(&mut self) {
        self.frames.push(Frame::function());
    }

    /// Push a frame restored from a checkpoint.
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Pop the innermost frame. The global frame is never popped.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Split off every frame above the global one, outermost first.
    pub fn take_nested_frames(&mut self) -> Vec<Frame> {
        if self.frames.is_empty() {
            self.frames.push(Frame::default());
        }
        self.frames.split_off(1)
    }

    /// Index of the frame holding the binding `name` resolves to.
    ///
    /// Lookup walks from the innermost frame outward and stops at the first
    /// function frame; the global frame is always visible.
    fn position(&self, name: &str) -> Option<usize> {
        for (i, frame) in self.frames.iter().enumerate().rev() {
            if frame.symbols.contains_key(name) {
                return Some(i);
            }
            if frame.function {
                break;
            }
        }
        self.frames
            .first()
            .filter(|global| global.symbols.contains_key(name))
            .map(|_| 0)
    }

    pub fn get_symbol(&self, name: &str) -> Option<&ScopeSymbol> {
        let i = self.position(name)?;
        self.frames[i].symbols.get(name)
    }

    /// `local_only` restricts the check to the innermost frame; this is how
    /// redeclarations are detected.
    pub fn has_symbol(&self, name: &str, local_only: bool) -> bool {
        if local_only {
            self.frames
                .last()
                .is_some_and(|frame| frame.symbols.contains_key(name))
        } else {
            self.position(name).is_some()
        }
    }

    /// Add a binding to the innermost frame, shadowing outer ones.
    pub fn declare(&mut self, name: impl Into<String>, ty: Type, value: Value) {
        let name = name.into();
        if let Some(frame) = self.frames.last_mut() {
            frame
                .symbols
                .insert(name.clone(), ScopeSymbol::new(name, ty, value));
        }
    }

    /// Update the nearest binding of `name`. Returns `false` when the name
    /// is not in scope.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        let Some(i) = self.position(name) else {
            return false;
        };
        match self.frames[i].symbols.get_mut(name) {
            Some(symbol) => {
                symbol.value = value;
                true
            }
            None => false,
        }
    }
}
