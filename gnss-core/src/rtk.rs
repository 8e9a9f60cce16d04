//! RTK solution state aggregator.
//!
//! Consumes decoded messages, keeps per-satellite ephemeris and a rolling
//! window of observation epochs, and emits [`RtkSolution`]s on a bounded
//! channel. The solution tier comes from a pluggable [`Solver`]; the built-in
//! [`HeuristicSolver`] derives it from observation counts and does no
//! carrier-phase processing.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::geodesy::Geodetic;
use crate::position::Position;
use crate::rtcm::{self, Ephemeris, ObservationSet, StationCoordinates};
use crate::types::*;
use crate::ubx;

/// Observation epochs kept for the heuristic.
pub const OBSERVATION_WINDOW: usize = 10;

/// Solutions buffered between the aggregator and its consumer.
pub const SOLUTION_CHANNEL_CAPACITY: usize = 10;

const STATIC_HDOP: f64 = 0.8;
const NO_SATELLITE_HDOP: f64 = 99.9;

// ---------------------------------------------------------------------------
// Mode and solution
// ---------------------------------------------------------------------------

/// Receiver motion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtkMode {
    /// Antenna does not move; a reference station ARP becomes the fixed basis.
    Static,
    #[default]
    Kinematic,
}

impl FromStr for RtkMode {
    type Err = RtkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(RtkMode::Static),
            "kinematic" => Ok(RtkMode::Kinematic),
            other => Err(RtkError::Config(format!("unknown RTK mode '{other}'"))),
        }
    }
}

impl fmt::Display for RtkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtkMode::Static => write!(f, "static"),
            RtkMode::Kinematic => write!(f, "kinematic"),
        }
    }
}

/// A computed position fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtkSolution {
    pub status: SolutionStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub satellites: u32,
    pub hdop: f64,
    /// Receiver-reported position DOP; NAV-PVT only
    pub pdop: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl RtkSolution {
    /// GGA-equivalent fix quality code.
    pub fn fix_quality(&self) -> u8 {
        self.status.fix_quality().code()
    }

    pub fn to_position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            fix_quality: self.fix_quality(),
            satellites: self.satellites,
            hdop: self.hdop,
            timestamp: self.timestamp,
            description: format!("RTK solution ({})", self.status),
            stats: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Solver boundary
// ---------------------------------------------------------------------------

/// Turns a message stream into solutions. Implementations own all
/// per-stream state.
pub trait Solver: Send {
    /// Apply one message; return a solution if this message updated the
    /// state and a position can be produced.
    fn update(&mut self, msg: &Message) -> Option<RtkSolution>;
}

/// Satellite-count heuristic.
///
/// - static mode with a station basis: `Fix`, satellites = ephemeris count
/// - otherwise: tier from valid satellites in the latest epoch
///   (>=5 fix, 4 float, 3 dgps, 2 single, else none), HDOP = 5/n
/// - NAV-PVT: receiver-reported tier passes through
#[derive(Debug, Default)]
pub struct HeuristicSolver {
    mode: RtkMode,
    ephemeris: HashMap<u8, Ephemeris>,
    observations: VecDeque<ObservationSet>,
    station: Option<StationCoordinates>,
    /// Station ARP in geodetic form, adopted as basis in static mode
    station_basis: Option<Geodetic>,
    /// Most recent receiver-reported position
    rover_basis: Option<Geodetic>,
    message_types: BTreeMap<u16, u64>,
}

impl HeuristicSolver {
    pub fn new(mode: RtkMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn ephemeris(&self, satellite_id: u8) -> Option<&Ephemeris> {
        self.ephemeris.get(&satellite_id)
    }

    pub fn ephemeris_count(&self) -> usize {
        self.ephemeris.len()
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn observations(&self) -> impl Iterator<Item = &ObservationSet> {
        self.observations.iter()
    }

    pub fn station(&self) -> Option<&StationCoordinates> {
        self.station.as_ref()
    }

    /// RTCM message numbers seen so far, with counts.
    pub fn message_types(&self) -> &BTreeMap<u16, u64> {
        &self.message_types
    }

    /// Apply an RTCM message. Returns true when solver state changed.
    fn apply_rtcm(&mut self, msg: &RtcmMessage) -> bool {
        *self.message_types.entry(msg.message_type).or_insert(0) += 1;

        match msg.message_type {
            1019 => match rtcm::decode_gps_ephemeris(msg) {
                Some(eph) => {
                    debug!("ephemeris G{:02} IODE {}", eph.satellite_id, eph.iode);
                    self.ephemeris.insert(eph.satellite_id, eph);
                    true
                }
                None => false,
            },
            1005 | 1006 => match rtcm::decode_station(msg) {
                Some(station) => {
                    let geo = station.geodetic();
                    if self.station_basis.is_none() {
                        info!(
                            "reference station {} at {:.7}, {:.7}, {:.3} m",
                            station.station_id, geo.latitude, geo.longitude, geo.altitude
                        );
                    }
                    self.station_basis = Some(geo);
                    self.station = Some(station);
                    true
                }
                None => false,
            },
            _ => match rtcm::decode_observations(msg) {
                Some(obs) => {
                    self.observations.push_back(obs);
                    while self.observations.len() > OBSERVATION_WINDOW {
                        self.observations.pop_front();
                    }
                    true
                }
                None => false,
            },
        }
    }

    fn apply_ubx(&mut self, msg: &UbxMessage) -> Option<RtkSolution> {
        let pvt = ubx::decode_nav_pvt(msg)?;
        let status = pvt.status();
        if status != SolutionStatus::None {
            self.rover_basis = Some(Geodetic {
                latitude: pvt.latitude,
                longitude: pvt.longitude,
                altitude: pvt.height,
            });
        }
        // Ellipsoidal heights throughout, matching the station ARP basis
        Some(RtkSolution {
            status,
            latitude: pvt.latitude,
            longitude: pvt.longitude,
            altitude: pvt.height,
            satellites: pvt.num_sv as u32,
            hdop: approximate_hdop(pvt.num_sv as usize),
            pdop: Some(pvt.pdop),
            timestamp: pvt.timestamp().unwrap_or_else(Utc::now),
        })
    }

    fn compute(&self) -> Option<RtkSolution> {
        if self.mode == RtkMode::Static {
            if let Some(basis) = self.station_basis {
                return Some(RtkSolution {
                    status: SolutionStatus::Fix,
                    latitude: basis.latitude,
                    longitude: basis.longitude,
                    altitude: basis.altitude,
                    satellites: self.ephemeris.len() as u32,
                    hdop: STATIC_HDOP,
                    pdop: None,
                    timestamp: Utc::now(),
                });
            }
        }

        let observation = self.observations.back()?;
        let basis = self.rover_basis.or(self.station_basis)?;
        let valid = observation.valid_satellites();
        Some(RtkSolution {
            status: status_from_satellites(valid),
            latitude: basis.latitude,
            longitude: basis.longitude,
            altitude: basis.altitude,
            satellites: valid as u32,
            hdop: approximate_hdop(valid),
            pdop: None,
            timestamp: Utc::now(),
        })
    }
}

impl Solver for HeuristicSolver {
    fn update(&mut self, msg: &Message) -> Option<RtkSolution> {
        match msg {
            Message::Rtcm(m) => {
                if self.apply_rtcm(m) {
                    self.compute()
                } else {
                    None
                }
            }
            Message::Ubx(m) => self.apply_ubx(m),
            Message::Nmea(_) => None,
        }
    }
}

/// Solution tier from the number of satellites with valid observations.
pub fn status_from_satellites(valid: usize) -> SolutionStatus {
    match valid {
        n if n >= 5 => SolutionStatus::Fix,
        4 => SolutionStatus::Float,
        3 => SolutionStatus::Dgps,
        2 => SolutionStatus::Single,
        _ => SolutionStatus::None,
    }
}

/// HDOP approximation: 5/n, 99.9 with no satellites.
pub fn approximate_hdop(valid: usize) -> f64 {
    if valid == 0 {
        NO_SATELLITE_HDOP
    } else {
        5.0 / valid as f64
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Aggregator counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatorStats {
    pub messages: u64,
    pub solutions: u64,
    /// Solutions discarded because the channel was full
    pub dropped: u64,
    /// Solutions with `Fix` status
    pub fixed: u64,
}

impl AggregatorStats {
    /// Share of solutions that were fixed, 0.0 before the first solution.
    pub fn fix_ratio(&self) -> f64 {
        if self.solutions == 0 {
            0.0
        } else {
            self.fixed as f64 / self.solutions as f64
        }
    }
}

struct AggregatorState<S> {
    solver: S,
    stats: AggregatorStats,
    last_solution: Option<RtkSolution>,
}

/// Thread-safe wrapper that feeds a [`Solver`] and publishes its solutions.
///
/// The consumer side is the `Receiver` returned by the constructor; it
/// disconnects once the aggregator is dropped.
pub struct RtkAggregator<S: Solver = HeuristicSolver> {
    state: Mutex<AggregatorState<S>>,
    tx: SyncSender<RtkSolution>,
}

impl RtkAggregator<HeuristicSolver> {
    pub fn new(mode: RtkMode) -> (Self, Receiver<RtkSolution>) {
        Self::with_solver(HeuristicSolver::new(mode))
    }
}

impl<S: Solver> RtkAggregator<S> {
    pub fn with_solver(solver: S) -> (Self, Receiver<RtkSolution>) {
        let (tx, rx) = sync_channel(SOLUTION_CHANNEL_CAPACITY);
        let aggregator = RtkAggregator {
            state: Mutex::new(AggregatorState {
                solver,
                stats: AggregatorStats::default(),
                last_solution: None,
            }),
            tx,
        };
        (aggregator, rx)
    }

    /// Apply a message; publish and return the resulting solution, if any.
    ///
    /// Publishing never blocks: when the channel is full the new solution is
    /// dropped and counted.
    pub fn feed(&self, msg: &Message) -> Option<RtkSolution> {
        let mut state = self.lock();
        state.stats.messages += 1;
        let solution = state.solver.update(msg)?;

        state.stats.solutions += 1;
        if solution.status == SolutionStatus::Fix {
            state.stats.fixed += 1;
        }
        state.last_solution = Some(solution.clone());

        match self.tx.try_send(solution.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                state.stats.dropped += 1;
                debug!("solution channel full, dropping newest solution");
            }
            Err(TrySendError::Disconnected(_)) => {
                state.stats.dropped += 1;
                warn!("solution consumer gone, dropping solution");
            }
        }
        Some(solution)
    }

    pub fn last_solution(&self) -> Option<RtkSolution> {
        self.lock().last_solution.clone()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.lock().stats.clone()
    }

    /// Read solver state under the lock.
    pub fn with_solver_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock().solver)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AggregatorState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
