// SPDX-License-Identifier: CEPL-1.0
use prism_math::{Quat, Transform, Vec3, Vec4};

use crate::error::SceneError;
use crate::graph::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Translation,
    Rotation,
    Scale,
}

impl Channel {
    pub fn parse(s: &str) -> Result<Self, SceneError> {
        match s {
            "translation" => Ok(Channel::Translation),
            "rotation" => Ok(Channel::Rotation),
            "scale" => Ok(Channel::Scale),
            other => Err(SceneError::UnknownEnum {
                what: "driver channel",
                value: other.to_string(),
            }),
        }
    }

    /// Floats per keyframe.
    pub fn arity(self) -> usize {
        match self {
            Channel::Rotation => 4,
            Channel::Translation | Channel::Scale => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    Linear,
    Slerp,
}

impl Interpolation {
    pub fn parse(s: &str) -> Result<Self, SceneError> {
        match s {
            "STEP" => Ok(Interpolation::Step),
            "LINEAR" => Ok(Interpolation::Linear),
            "SLERP" => Ok(Interpolation::Slerp),
            other => Err(SceneError::UnknownEnum {
                what: "driver interpolation",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChannelValue {
    Vec3(Vec3),
    Quat(Quat),
}

impl ChannelValue {
    pub fn to_vec(&self) -> Vec<f32> {
        match self {
            ChannelValue::Vec3(v) => v.to_array().to_vec(),
            ChannelValue::Quat(q) => q.to_array().to_vec(),
        }
    }
}

/// Keyframed curve writing one TRS channel of one node.
#[derive(Clone, Debug)]
pub struct Driver {
    pub name: String,
    pub node: NodeId,
    pub channel: Channel,
    pub interpolation: Interpolation,
    times: Vec<f32>,
    values: Vec<f32>,
}

impl Driver {
    /// Validates keyframe layout: times non-decreasing, `values.len() == times.len() * arity`,
    /// and SLERP only on 4-wide (rotation) channels.
    pub fn new(
        name: impl Into<String>,
        node: NodeId,
        channel: Channel,
        interpolation: Interpolation,
        times: Vec<f32>,
        values: Vec<f32>,
    ) -> Result<Self, SceneError> {
        let name = name.into();
        let invalid = |reason: String| SceneError::InvalidDriver {
            name: name.clone(),
            reason,
        };

        if interpolation == Interpolation::Slerp && channel.arity() != 4 {
            return Err(invalid(format!(
                "SLERP needs 4 values per key, {channel:?} has {}",
                channel.arity()
            )));
        }
        if values.len() != times.len() * channel.arity() {
            return Err(invalid(format!(
                "{} keys need {} values, got {}",
                times.len(),
                times.len() * channel.arity(),
                values.len()
            )));
        }
        if times.windows(2).any(|w| !(w[0] <= w[1])) {
            return Err(invalid("keyframe times must be non-decreasing".into()));
        }

        Ok(Self {
            name,
            node,
            channel,
            interpolation,
            times,
            values,
        })
    }

    pub fn times(&self) -> &[f32] {
        &self.times
    }

    /// Timestamp of the last keyframe, or 0 for an empty driver.
    pub fn end_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// `None` before the first keyframe; the last value after the last keyframe.
    /// A time exactly on a boundary belongs to the segment that starts there.
    pub fn value_at(&self, time: f32) -> Option<ChannelValue> {
        let first = *self.times.first()?;
        if time < first {
            return None;
        }
        let last = self.times.len() - 1;
        if time >= self.times[last] {
            return Some(self.key(last));
        }

        // First segment whose start is <= time wins, so boundary hits pick up the
        // following segment.
        let i = self.times.partition_point(|&t| t <= time).saturating_sub(1);
        let (t0, t1) = (self.times[i], self.times[i + 1]);
        let (a, b) = (self.key(i), self.key(i + 1));

        let span = t1 - t0;
        let f = if span > 0.0 { (time - t0) / span } else { 0.0 };

        Some(match self.interpolation {
            Interpolation::Step => a,
            Interpolation::Linear => match (a, b) {
                (ChannelValue::Vec3(a), ChannelValue::Vec3(b)) => {
                    ChannelValue::Vec3(a.lerp(b, f))
                }
                (ChannelValue::Quat(a), ChannelValue::Quat(b)) => {
                    let v = Vec4::from(a).lerp(Vec4::from(b), f);
                    ChannelValue::Quat(Quat::from_vec4(v).normalize())
                }
                _ => a,
            },
            Interpolation::Slerp => match (a, b) {
                (ChannelValue::Quat(a), ChannelValue::Quat(b)) => {
                    ChannelValue::Quat(a.normalize().slerp(b.normalize(), f))
                }
                _ => a,
            },
        })
    }

    fn key(&self, i: usize) -> ChannelValue {
        let n = self.channel.arity();
        let v = &self.values[i * n..(i + 1) * n];
        match self.channel {
            Channel::Rotation => ChannelValue::Quat(Quat::from_xyzw(v[0], v[1], v[2], v[3])),
            Channel::Translation | Channel::Scale => {
                ChannelValue::Vec3(Vec3::new(v[0], v[1], v[2]))
            }
        }
    }

    /// Evaluates at `time` and writes the driven channel. Leaves the transform
    /// untouched before the first keyframe.
    pub fn apply(&self, time: f32, transform: &mut Transform) {
        let Some(value) = self.value_at(time) else {
            return;
        };
        match (self.channel, value) {
            (Channel::Translation, ChannelValue::Vec3(v)) => transform.translation = v,
            (Channel::Scale, ChannelValue::Vec3(v)) => transform.scale = v,
            (Channel::Rotation, ChannelValue::Quat(q)) => transform.rotation = q,
            _ => {}
        }
    }
}
