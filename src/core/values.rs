//! The `Values` container of current estimates and the `VectorValues` container of tangent
//! updates.
//!
//! Both are ordered by [`Key`]. `Values` is never updated in place by the optimizer:
//! [`Values::retract`] builds a new container, so a rejected step leaves the estimate untouched.

use crate::camera::{Cal3Bundler, PinholeCamera};
use crate::core::{CoreError, CoreResult, Key};
use crate::manifold::{Manifold, ManifoldResult, se2::SE2, se3::SE3};
use nalgebra::{DVector, Vector3};
use std::collections::{BTreeMap, btree_map};
use std::fmt;

/// A variable value. Each variant is an element of a manifold with a fixed tangent dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Pose2(SE2),
    Pose3(SE3),
    Point3(Vector3<f64>),
    Vector(DVector<f64>),
    Calibration(Cal3Bundler),
    Camera(PinholeCamera),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Pose2(_) => SE2::TYPE_NAME,
            Value::Pose3(_) => SE3::TYPE_NAME,
            Value::Point3(_) => Vector3::<f64>::TYPE_NAME,
            Value::Vector(_) => DVector::<f64>::TYPE_NAME,
            Value::Calibration(_) => Cal3Bundler::TYPE_NAME,
            Value::Camera(_) => PinholeCamera::TYPE_NAME,
        }
    }

    /// Tangent-space dimension.
    pub fn dim(&self) -> usize {
        match self {
            Value::Pose2(v) => Manifold::tangent_dim(v),
            Value::Pose3(v) => Manifold::tangent_dim(v),
            Value::Point3(v) => v.tangent_dim(),
            Value::Vector(v) => v.tangent_dim(),
            Value::Calibration(v) => v.tangent_dim(),
            Value::Camera(v) => v.tangent_dim(),
        }
    }

    pub fn retract(&self, delta: &DVector<f64>) -> ManifoldResult<Value> {
        Ok(match self {
            Value::Pose2(v) => Value::Pose2(v.retract(delta)?),
            Value::Pose3(v) => Value::Pose3(v.retract(delta)?),
            Value::Point3(v) => Value::Point3(v.retract(delta)?),
            Value::Vector(v) => Value::Vector(v.retract(delta)?),
            Value::Calibration(v) => Value::Calibration(v.retract(delta)?),
            Value::Camera(v) => Value::Camera(v.retract(delta)?),
        })
    }

    /// Tangent vector from `self` to `other`; `key` only labels a type mismatch.
    pub fn local_coordinates(&self, other: &Value, key: Key) -> CoreResult<DVector<f64>> {
        let d = match (self, other) {
            (Value::Pose2(a), Value::Pose2(b)) => a.local_coordinates(b)?,
            (Value::Pose3(a), Value::Pose3(b)) => a.local_coordinates(b)?,
            (Value::Point3(a), Value::Point3(b)) => a.local_coordinates(b)?,
            (Value::Vector(a), Value::Vector(b)) => a.local_coordinates(b)?,
            (Value::Calibration(a), Value::Calibration(b)) => a.local_coordinates(b)?,
            (Value::Camera(a), Value::Camera(b)) => a.local_coordinates(b)?,
            _ => {
                return Err(CoreError::TypeMismatch {
                    key,
                    expected: self.type_name(),
                    actual: other.type_name(),
                }
                .log());
            }
        };
        Ok(d)
    }
}

/// A concrete variable type storable in [`Values`].
pub trait VariableType: Manifold + Sized {
    const TYPE_NAME: &'static str;

    fn from_value(value: &Value) -> Option<&Self>;

    fn into_value(self) -> Value;
}

macro_rules! impl_variable_type {
    ($type:ty, $variant:ident, $name:expr) => {
        impl VariableType for $type {
            const TYPE_NAME: &'static str = $name;

            fn from_value(value: &Value) -> Option<&Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

impl_variable_type!(SE2, Pose2, "Pose2");
impl_variable_type!(SE3, Pose3, "Pose3");
impl_variable_type!(Vector3<f64>, Point3, "Point3");
impl_variable_type!(DVector<f64>, Vector, "Vector");
impl_variable_type!(Cal3Bundler, Calibration, "Cal3Bundler");
impl_variable_type!(PinholeCamera, Camera, "PinholeCamera");

/// Current estimate: one manifold value per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    values: BTreeMap<Key, Value>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new variable. Inserting an existing key is an error.
    pub fn insert<T: VariableType>(&mut self, key: Key, value: T) -> CoreResult<()> {
        self.insert_value(key, value.into_value())
    }

    pub fn insert_value(&mut self, key: Key, value: Value) -> CoreResult<()> {
        match self.values.entry(key) {
            btree_map::Entry::Occupied(_) => Err(CoreError::DuplicateKey(key).log()),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    /// Replace the value of an existing key, keeping its type.
    pub fn update<T: VariableType>(&mut self, key: Key, value: T) -> CoreResult<()> {
        let slot = self
            .values
            .get_mut(&key)
            .ok_or_else(|| CoreError::MissingKey(key).log())?;
        if T::from_value(slot).is_none() {
            return Err(CoreError::TypeMismatch {
                key,
                expected: slot.type_name(),
                actual: T::TYPE_NAME,
            }
            .log());
        }
        *slot = value.into_value();
        Ok(())
    }

    pub fn get(&self, key: Key) -> CoreResult<&Value> {
        self.values.get(&key).ok_or(CoreError::MissingKey(key))
    }

    /// Typed access to a variable.
    pub fn at<T: VariableType>(&self, key: Key) -> CoreResult<&T> {
        let value = self.get(key)?;
        T::from_value(value).ok_or(CoreError::TypeMismatch {
            key,
            expected: T::TYPE_NAME,
            actual: value.type_name(),
        })
    }

    pub fn contains_key(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Total tangent dimension of all variables.
    pub fn dim(&self) -> usize {
        self.values.values().map(Value::dim).sum()
    }

    /// Apply a tangent update and return the new estimate.
    ///
    /// Keys absent from `delta` are copied unchanged. An update for a key that is not present
    /// is a [`CoreError::MissingKey`].
    pub fn retract(&self, delta: &VectorValues) -> CoreResult<Values> {
        if let Some(unknown) = delta.keys().find(|k| !self.values.contains_key(k)) {
            return Err(CoreError::MissingKey(unknown).log());
        }
        let values = self
            .values
            .iter()
            .map(|(key, value)| {
                let updated = match delta.get(*key) {
                    Some(d) => value.retract(d)?,
                    None => value.clone(),
                };
                Ok((*key, updated))
            })
            .collect::<CoreResult<BTreeMap<_, _>>>()?;
        Ok(Values { values })
    }

    /// Per-key tangent differences from `self` to `other`; both must hold the same keys.
    pub fn local_coordinates(&self, other: &Values) -> CoreResult<VectorValues> {
        if let Some(unknown) = other.keys().find(|k| !self.values.contains_key(k)) {
            return Err(CoreError::MissingKey(unknown));
        }
        let mut result = VectorValues::new();
        for (key, value) in &self.values {
            let target = other.get(*key)?;
            result.insert(*key, value.local_coordinates(target, *key)?);
        }
        Ok(result)
    }
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Values with {} variables:", self.values.len())?;
        for (key, value) in &self.values {
            writeln!(f, "  {key}: {value:?}")?;
        }
        Ok(())
    }
}

/// Tangent vectors keyed by variable. Also used to hold dual variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    values: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero vector for every variable in `values`.
    pub fn zero(values: &Values) -> Self {
        VectorValues {
            values: values
                .iter()
                .map(|(k, v)| (k, DVector::zeros(v.dim())))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: Key, vector: DVector<f64>) -> Option<DVector<f64>> {
        self.values.insert(key, vector)
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    pub fn contains_key(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVector<f64>)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Euclidean norm of the stacked vector.
    pub fn norm(&self) -> f64 {
        self.values
            .values()
            .map(|v| v.norm_squared())
            .sum::<f64>()
            .sqrt()
    }

    /// Multiply every vector by `factor`.
    pub fn scale(&self, factor: f64) -> VectorValues {
        VectorValues {
            values: self.values.iter().map(|(k, v)| (*k, v * factor)).collect(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.values
            .values()
            .all(|v| v.iter().all(|x| x.is_finite()))
    }
}

impl FromIterator<(Key, DVector<f64>)> for VectorValues {
    fn from_iter<I: IntoIterator<Item = (Key, DVector<f64>)>>(iter: I) -> Self {
        VectorValues {
            values: iter.into_iter().collect(),
        }
    }
}
