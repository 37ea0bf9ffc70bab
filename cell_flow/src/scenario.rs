//! Named scenarios.
//!
//! A scenario builds a flow from the machine topology. The control channel
//! starts runs by scenario name.
//!
//! | Name             | Flow                                                       |
//! |------------------|------------------------------------------------------------|
//! | `home_all`       | Home every axis in parallel                                |
//! | `axis_demo`      | First axis to 50, then second axis to 90                   |
//! | `pick_and_place` | Three pick-and-place cycles with material tracking        |

use crate::error::Fault;
use crate::step::{self, Step};
use cell_common::topology::{ActuatorKind, MachineTopology};
use std::collections::BTreeMap;

/// Builds a flow for a topology.
pub type ScenarioBuilder = fn(&MachineTopology) -> Result<Step, Fault>;

/// Station where blanks appear.
pub const INFEED_STATION: &str = "Infeed";

/// Station where finished parts are dropped.
pub const OUTFEED_STATION: &str = "Outfeed";

/// Registry of scenario builders.
pub struct ScenarioCatalog {
    builders: BTreeMap<&'static str, ScenarioBuilder>,
}

impl ScenarioCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// Catalog holding the built-in scenarios.
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("home_all", home_all);
        catalog.register("axis_demo", axis_demo);
        catalog.register("pick_and_place", pick_and_place);
        catalog
    }

    /// Register a scenario.
    ///
    /// # Panics
    /// Panics if a scenario with the same name is already registered.
    pub fn register(&mut self, name: &'static str, builder: ScenarioBuilder) {
        if self.builders.contains_key(name) {
            panic!("Scenario '{name}' is already registered");
        }
        self.builders.insert(name, builder);
    }

    /// Build the flow of scenario `name`.
    ///
    /// # Errors
    /// `UnknownScenario` for unregistered names; builders report
    /// `ScenarioUnavailable` when the topology lacks devices.
    pub fn build(&self, name: &str, topology: &MachineTopology) -> Result<Step, Fault> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| Fault::UnknownScenario(name.to_string()))?;
        builder(topology)
    }

    /// Registered scenario names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.builders.keys().copied().collect()
    }
}

impl Default for ScenarioCatalog {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn unavailable(scenario: &str, reason: impl Into<String>) -> Fault {
    Fault::ScenarioUnavailable {
        scenario: scenario.to_string(),
        reason: reason.into(),
    }
}

fn home_all(topology: &MachineTopology) -> Result<Step, Fault> {
    let homes = topology.axes.iter().map(|axis| step::home(&axis.id));
    Ok(step::scope("Home all axes", step::parallel(homes)))
}

fn axis_demo(topology: &MachineTopology) -> Result<Step, Fault> {
    let [first, second, ..] = topology.axes.as_slice() else {
        return Err(unavailable("axis_demo", "needs two axes"));
    };
    let second = second.id.clone();
    let flow = step::sequence(step::move_to_and_wait(&first.id, 50.0), move |_| {
        step::move_to_and_wait(&second, 90.0)
    });
    Ok(flow.named("Axis demo"))
}

fn pick_and_place(topology: &MachineTopology) -> Result<Step, Fault> {
    let [x_axis, z_axis, ..] = topology.axes.as_slice() else {
        return Err(unavailable("pick_and_place", "needs two axes"));
    };
    let find = |kind: ActuatorKind| {
        topology
            .actuators
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.id.clone())
    };
    let gripper = find(ActuatorKind::Cylinder)
        .ok_or_else(|| unavailable("pick_and_place", "needs a cylinder"))?;
    let suction = find(ActuatorKind::Vacuum)
        .ok_or_else(|| unavailable("pick_and_place", "needs a vacuum effector"))?;

    let x = x_axis.id.as_str();
    let z = z_axis.id.as_str();
    let span = x_axis.max - x_axis.min;
    let pick_x = x_axis.min + 0.1 * span;
    let place_x = x_axis.max - 0.1 * span;
    let z_up = z_axis.home_position();
    let z_down = z_axis.clamp(z_axis.min + 0.8 * (z_axis.max - z_axis.min));

    let pick = step::scope(
        "Pick",
        step::chain([
            step::move_to_and_wait(x, pick_x),
            step::move_to_and_wait(z, z_down),
            step::fire_and_wait(&suction, true),
            step::fire_and_wait(&gripper, true),
            step::attach(&suction, INFEED_STATION),
            step::move_to_and_wait(z, z_up),
        ]),
    );

    let place = step::scope(
        "Place",
        step::chain([
            step::move_to_and_wait(x, place_x),
            step::move_to_and_wait(z, z_down),
            step::fire_and_wait(&gripper, false),
            step::fire_and_wait(&suction, false),
            step::detach(&suction, OUTFEED_STATION),
            step::move_to_and_wait(z, z_up),
        ]),
    );

    let cycle = step::chain([
        step::spawn(INFEED_STATION, "Blank").named("Feed blank"),
        pick,
        place,
        step::transform(OUTFEED_STATION, "Assembled").named("Inspect"),
        step::consume(OUTFEED_STATION).named("Unload"),
    ]);

    let flow = step::chain([
        step::parallel([step::home(x), step::home(z)]).named("Home"),
        step::repeat(cycle, 3),
    ]);
    Ok(step::scope("Pick and place", flow))
}
