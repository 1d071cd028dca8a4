use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::floating_type_mod::FT;

#[derive(Clone, Debug)]
pub struct Counter<T> {
    values: Vec<T>,
    last_start: Instant,
}

impl<T> Counter<T> {
    fn new() -> Self {
        Counter::<T> {
            last_start: Instant::now(),
            values: Vec::new(),
        }
    }

    fn add_value(&mut self, v: T) {
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl Counter<FT> {
    pub fn avg(&self) -> FT {
        if self.values.is_empty() {
            return 0.;
        }
        self.values.iter().cloned().sum::<FT>() / self.values.len() as FT
    }

    pub fn min(&self) -> FT {
        self.values.iter().cloned().fold(FT::MAX, FT::min)
    }

    pub fn max(&self) -> FT {
        self.values.iter().cloned().fold(FT::MIN, FT::max)
    }
}

impl Counter<Duration> {
    fn begin(&mut self) {
        self.last_start = Instant::now();
    }

    fn end(&mut self) {
        self.values.push(Instant::now() - self.last_start);
    }

    pub fn avg(&self) -> Duration {
        if self.values.is_empty() {
            return Duration::ZERO;
        }
        self.values.iter().cloned().sum::<Duration>() / self.values.len() as u32
    }

    pub fn sum(&self) -> Duration {
        self.values.iter().cloned().sum::<Duration>()
    }
}

/// Named series of sampled values (one sample per frame).
pub struct ValueCounters {
    counters: HashMap<String, Counter<FT>>,
    enabled: bool,
}

impl ValueCounters {
    pub fn new(enabled: bool) -> ValueCounters {
        ValueCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn add_value(&mut self, id: &str, v: FT) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<FT>::new)
                .add_value(v);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<FT>> {
        self.counters.get(id)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Named wall-time measurements, bracketed by `begin`/`end`.
pub struct PerformanceCounters {
    counters: HashMap<String, Counter<Duration>>,
    enabled: bool,
}

impl PerformanceCounters {
    pub fn new(enabled: bool) -> PerformanceCounters {
        PerformanceCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn begin(&mut self, id: &str) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<Duration>::new)
                .begin();
        }
    }

    pub fn end(&mut self, id: &str) {
        if self.enabled {
            if let Some(counter) = self.counters.get_mut(id) {
                counter.end();
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<Duration>> {
        self.counters.get(id)
    }
}

/// Text report of all counters: total frame time, per-stage averages, then value series.
pub fn write_statistics(pcounters: &PerformanceCounters, vcounters: &ValueCounters) -> String {
    let mut s = String::new();

    if let Some(frame) = pcounters.get("frame") {
        // writing into a String cannot fail
        let _ = writeln!(
            s,
            "simulation-time: {:.3}ms over {} frames",
            frame.sum().as_secs_f64() * 1000.,
            frame.len()
        );
        let _ = writeln!(s);
    }

    let mut v = pcounters.counters.iter().collect::<Vec<_>>();
    v.sort_by(|x, y| x.0.cmp(y.0));
    for (label, pcounter) in v {
        let _ = writeln!(s, "{}: avg:{:.4}ms", label, pcounter.avg().as_secs_f64() * 1000.);
    }
    let _ = writeln!(s);

    let mut v = vcounters.counters.iter().collect::<Vec<_>>();
    v.sort_by(|x, y| x.0.cmp(y.0));
    for (label, vcounter) in v {
        let _ = writeln!(
            s,
            "{}: min:{} max:{} avg:{}",
            label,
            vcounter.min(),
            vcounter.max(),
            vcounter.avg()
        );
    }

    s
}

#[test]
fn disabled_counters_record_nothing() {
    let mut pcounters = PerformanceCounters::new(false);
    let mut vcounters = ValueCounters::new(false);
    pcounters.begin("frame");
    pcounters.end("frame");
    vcounters.add_value("occupied-cells", 3.);
    assert!(pcounters.get("frame").is_none());
    assert!(vcounters.get("occupied-cells").is_none());
}

#[test]
fn report_lists_every_counter() {
    let mut pcounters = PerformanceCounters::new(true);
    let mut vcounters = ValueCounters::new(true);
    for value in [1., 2., 6.] {
        pcounters.begin("frame");
        pcounters.begin("collide");
        pcounters.end("collide");
        pcounters.end("frame");
        vcounters.add_value("max-cell-occupancy", value);
    }

    let occupancy = vcounters.get("max-cell-occupancy").unwrap();
    assert_eq!(occupancy.min(), 1.);
    assert_eq!(occupancy.max(), 6.);
    assert_eq!(occupancy.avg(), 3.);
    assert_eq!(pcounters.get("collide").unwrap().len(), 3);

    let report = write_statistics(&pcounters, &vcounters);
    assert!(report.contains("over 3 frames"));
    assert!(report.contains("collide: avg:"));
    assert!(report.contains("max-cell-occupancy: min:1 max:6 avg:3"));
}
