//! Scripted backends for tests and wiring checks.
//!
//! Each stub replays a prepared per-frame script; after the script is
//! exhausted it keeps returning the last entry (or nothing when empty).

use super::{FireObjectBackend, ObjectBox, PoseBackend, PoseResult};
use anyhow::Result;
use common::Frame;
use std::collections::VecDeque;

pub struct StubPoseBackend {
    script: VecDeque<Vec<PoseResult>>,
    last: Vec<PoseResult>,
}

impl StubPoseBackend {
    pub fn new(script: Vec<Vec<PoseResult>>) -> Self {
        Self {
            script: script.into(),
            last: Vec::new(),
        }
    }

    /// Backend that returns the same poses for every frame.
    pub fn constant(poses: Vec<PoseResult>) -> Self {
        Self {
            script: VecDeque::new(),
            last: poses,
        }
    }

    pub fn empty() -> Self {
        Self::constant(Vec::new())
    }
}

impl PoseBackend for StubPoseBackend {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<PoseResult>> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self.last.clone())
    }
}

pub struct StubObjectBackend {
    script: VecDeque<Vec<ObjectBox>>,
    last: Vec<ObjectBox>,
}

impl StubObjectBackend {
    pub fn new(script: Vec<Vec<ObjectBox>>) -> Self {
        Self {
            script: script.into(),
            last: Vec::new(),
        }
    }

    pub fn constant(boxes: Vec<ObjectBox>) -> Self {
        Self {
            script: VecDeque::new(),
            last: boxes,
        }
    }

    pub fn empty() -> Self {
        Self::constant(Vec::new())
    }
}

impl FireObjectBackend for StubObjectBackend {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObjectBox>> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self.last.clone())
    }
}
