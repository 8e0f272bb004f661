//
// Copyright (c) 2024 The rawk developers
//
// This file is part of the rawk project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use super::value::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// An AWK array: an unordered map from string keys to values. Reading a
/// missing key through a subscript creates a null entry (POSIX
/// auto-vivification); the `in` operator does not.
#[derive(Debug, Default)]
pub struct Array {
    map: HashMap<Rc<str>, Value>,
}

impl Array {
    /// Subscript read: creates the element if absent.
    pub fn get(&mut self, key: Rc<str>) -> Value {
        self.map.entry(key).or_default().clone()
    }

    /// Subscript reference: creates the element if absent.
    pub fn get_mut(&mut self, key: Rc<str>) -> &mut Value {
        self.map.entry(key).or_default()
    }

    /// Lookup without creating; `in` and the driver use this.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn set(&mut self, key: Rc<str>, value: Value) {
        self.map.insert(key, value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) {
        self.map.remove(key);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Snapshot of the key set for iteration; the for-in body may delete or
    /// insert entries while it runs.
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.map.keys().cloned().collect()
    }
}

impl<K: Into<Rc<str>>, V: Into<Value>> FromIterator<(K, V)> for Array {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Array {
            map: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}
