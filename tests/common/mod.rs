//! Shared mock ports for the integration suites.
//!
//! Everything here records what the domain asked of it so tests can
//! assert on full interaction histories without hardware or network.

#![allow(dead_code)] // each test binary uses a different subset

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use hydropod::error::HttpError;
use hydropod::ports::{AdcPort, ClimatePort, Clock, HttpFetch};

// ── Shared simulated clock ───────────────────────────────────

/// Millisecond clock the test body can advance while the orchestrator
/// holds its own handle.
#[derive(Clone)]
pub struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(0)))
    }

    pub fn advance(&self, delta_ms: u64) {
        self.0.set(self.0.get() + delta_ms);
    }

    pub fn set(&self, now_ms: u64) {
        self.0.set(now_ms);
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

// ── Scripted ADC ─────────────────────────────────────────────

/// Pops scripted counts per read; repeats the final value once the
/// script runs dry.
#[derive(Clone)]
pub struct ScriptedAdc {
    script: Rc<RefCell<VecDeque<u16>>>,
    last: Rc<Cell<u16>>,
}

impl ScriptedAdc {
    pub fn new(counts: &[u16]) -> Self {
        Self {
            script: Rc::new(RefCell::new(counts.iter().copied().collect())),
            last: Rc::new(Cell::new(counts.last().copied().unwrap_or(0))),
        }
    }
}

impl AdcPort for ScriptedAdc {
    fn read_counts(&mut self, _pin: u8) -> Option<u16> {
        match self.script.borrow_mut().pop_front() {
            Some(counts) => {
                self.last.set(counts);
                Some(counts)
            }
            None => Some(self.last.get()),
        }
    }
}

// ── Fixed climate source ─────────────────────────────────────

pub struct FixedClimate(pub f32, pub f32);

impl ClimatePort for FixedClimate {
    fn read(&mut self, _pin: u8) -> Option<(f32, f32)> {
        Some((self.0, self.1))
    }
}

// ── Scripted HTTP transport ──────────────────────────────────

/// Pops one canned response per request; connection failure once the
/// script runs dry. Records every requested URL.
pub struct ScriptedHttp {
    pub script: RefCell<VecDeque<Result<String, HttpError>>>,
    pub requests: Rc<RefCell<Vec<String>>>,
}

impl ScriptedHttp {
    pub fn new(script: Vec<Result<String, HttpError>>) -> Self {
        Self {
            script: RefCell::new(script.into_iter().collect()),
            requests: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }
}

impl HttpFetch for ScriptedHttp {
    fn get(&mut self, url: &str, _timeout_ms: u32) -> Result<String, HttpError> {
        self.requests.borrow_mut().push(url.to_string());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(HttpError::Connect))
    }
}
