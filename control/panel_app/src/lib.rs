use std::time::SystemTime;

use crux_core::macros::effect;
use crux_core::render::RenderOperation;
pub use crux_core::Core;
use crux_core::{render, App, Command};
pub use machines::pellet::{InverterState, LaserState, Mutation, RampLevel, RunState, StateEvent};
pub use machines::{MachineIdentification, MachineIdentificationUnique};
use optimistic::{MutateError, Optimistic, Projection};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::effects::machine_commander;
use crate::effects::machine_commander::{MachineCommanderOperation, MachineCommanderResult};

pub mod effects;

/// Control-panel core for one pellet machine.
///
/// Setpoint changes are applied optimistically: the new value is visible in
/// the view-model immediately, marked `pending` until the controller's state
/// feed pushes a snapshot, which resolves it whatever it contains; the feed
/// carries no correlation to the command that may have caused it.
#[derive(Default)]
pub struct Panel;

#[derive(Default)]
pub struct Model {
    machine_identification_unique: Option<MachineIdentificationUnique>,
    state: Optimistic<StateEvent>,

    error: Option<(chrono::DateTime<chrono::Utc>, String)>,
}

#[effect]
pub enum Effect {
    Render(RenderOperation),
    MachineCommander(MachineCommanderOperation),
}

/// What the shell renders. The raw canonical/optimistic pair is never
/// exposed; controls show `state`, dim while `pending` and must be disabled
/// while `disabled`.
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug, Clone)]
pub struct PanelViewModel {
    /// Effective state: the optimistic overlay if a setpoint change is in
    /// flight, else the last canonical snapshot.
    pub state: Option<StateEvent>,
    /// True while the shown state has not been confirmed by the controller.
    pub pending: bool,
    /// True until the first snapshot arrives; edit affordances must be
    /// disabled while set.
    pub disabled: bool,

    pub error: Option<(chrono::DateTime<chrono::Utc>, String)>,
}

impl Default for PanelViewModel {
    fn default() -> Self {
        Self {
            state: None,
            pending: false,
            // no snapshot yet, nothing is editable
            disabled: true,
            error: None,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub enum Event {
    None,
    /// The shell selected the machine this panel controls.
    Connect {
        machine_identification_unique: MachineIdentificationUnique,
    },
    /// A full state snapshot arrived on the controller's feed.
    StateArrived {
        state: StateEvent,
    },

    //
    // Operator setpoint intents
    //
    SetRunState {
        run_state: RunState,
    },
    SetFrequencyTarget {
        frequency_target: f64,
    },
    SetAccelerationLevel {
        acceleration_level: RampLevel,
    },
    SetDecelerationLevel {
        deceleration_level: RampLevel,
    },
    SetTargetDiameter {
        target_diameter: f64,
    },
    SetLowerTolerance {
        lower_tolerance: f64,
    },
    SetHigherTolerance {
        higher_tolerance: f64,
    },

    /// The shell finished (or failed) delivering a mutation.
    MutationCompleted(MachineCommanderResult),
}

impl Panel {
    fn update_inner(
        &self,
        event: <Panel as App>::Event,
    ) -> Box<
        dyn FnOnce(
            &mut <Panel as App>::Model,
        ) -> Result<Command<<Panel as App>::Effect, <Panel as App>::Event>, AppError>,
    > {
        match event {
            Event::None => Box::new(|_model: &mut Model| Ok(render::render())),
            Event::Connect {
                machine_identification_unique,
            } => Box::new(move |model: &mut Model| {
                debug!("Connected machine. machine: {}", machine_identification_unique);

                model
                    .machine_identification_unique
                    .replace(machine_identification_unique);

                Ok(render::render())
            }),
            Event::StateArrived {
                state,
            } => Box::new(move |model: &mut Model| {
                trace!("State snapshot arrived. state: {:?}", state);

                // Replaces the previous snapshot wholesale and resolves any
                // outstanding setpoint change, related to it or not.
                model.state.set_canonical(state);

                Ok(render::render())
            }),
            Event::SetRunState {
                run_state,
            } => Box::new(move |model: &mut Model| {
                Self::apply_setpoint(
                    model,
                    |state| state.inverter_state.run_state = run_state,
                    Mutation::SetRunState(run_state),
                )
            }),
            Event::SetFrequencyTarget {
                frequency_target,
            } => Box::new(move |model: &mut Model| {
                Self::apply_setpoint(
                    model,
                    |state| state.inverter_state.frequency_target = frequency_target,
                    Mutation::SetFrequencyTarget(frequency_target),
                )
            }),
            Event::SetAccelerationLevel {
                acceleration_level,
            } => Box::new(move |model: &mut Model| {
                Self::apply_setpoint(
                    model,
                    |state| state.inverter_state.acceleration_level = acceleration_level,
                    Mutation::SetAccelerationLevel(acceleration_level),
                )
            }),
            Event::SetDecelerationLevel {
                deceleration_level,
            } => Box::new(move |model: &mut Model| {
                Self::apply_setpoint(
                    model,
                    |state| state.inverter_state.deceleration_level = deceleration_level,
                    Mutation::SetDecelerationLevel(deceleration_level),
                )
            }),
            Event::SetTargetDiameter {
                target_diameter,
            } => Box::new(move |model: &mut Model| {
                Self::apply_setpoint(
                    model,
                    |state| state.laser_state.target_diameter = target_diameter,
                    Mutation::SetTargetDiameter(target_diameter),
                )
            }),
            Event::SetLowerTolerance {
                lower_tolerance,
            } => Box::new(move |model: &mut Model| {
                Self::apply_setpoint(
                    model,
                    |state| state.laser_state.lower_tolerance = lower_tolerance,
                    Mutation::SetLowerTolerance(lower_tolerance),
                )
            }),
            Event::SetHigherTolerance {
                higher_tolerance,
            } => Box::new(move |model: &mut Model| {
                Self::apply_setpoint(
                    model,
                    |state| state.laser_state.higher_tolerance = higher_tolerance,
                    Mutation::SetHigherTolerance(higher_tolerance),
                )
            }),
            Event::MutationCompleted(result) => Box::new(move |model: &mut Model| {
                match result {
                    MachineCommanderResult::Ok => {
                        // Delivery only; the change is confirmed (or not) by
                        // the next snapshot on the state feed.
                        trace!("Mutation delivered.");
                        Ok(render::render())
                    }
                    MachineCommanderResult::Err {
                        error,
                    } => {
                        // Revert the overlay if a snapshot hasn't already
                        // resolved it, then record the failure.
                        if model.state.clear_optimistic().is_some() {
                            warn!("Mutation failed while outstanding; reverting. cause: {}", error);
                        }

                        Err(AppError::CommandRejected(error))
                    }
                }
            }),
        }
    }

    /// One operator intent, atomically from the shell's point of view: derive
    /// the overlay from the current effective state, then ask the shell to
    /// deliver the matching mutation. Overlay-first, so the panel reflects
    /// the intent before any network latency is incurred.
    fn apply_setpoint(
        model: &mut Model,
        transform: impl FnOnce(&mut StateEvent),
        mutation: Mutation,
    ) -> Result<Command<Effect, Event>, AppError> {
        let machine_identification_unique = model
            .machine_identification_unique
            .ok_or(AppError::OperationRequiresMachine)?;

        match model.state.try_mutate(transform) {
            Ok(()) => {
                debug!("Applied setpoint optimistically. mutation: {:?}", mutation);

                let request = machine_commander::mutate_builder(machine_identification_unique, mutation)
                    .then_send(Event::MutationCompleted);

                Ok(request.and(render::render()))
            }
            Err(cause @ MutateError::MutationPending) => {
                // A second intent while one is in flight is dropped, not
                // queued and not merged.
                warn!("Ignoring setpoint change. cause: {}", cause);
                Ok(render::render())
            }
            Err(cause @ MutateError::Uninitialized) => {
                // The view layer disables controls until the first snapshot;
                // an intent that slips through anyway has nothing to apply to.
                warn!("Ignoring setpoint change. cause: {}", cause);
                Ok(render::render())
            }
        }
    }
}

impl App for Panel {
    type Event = Event;
    type Model = Model;
    type ViewModel = PanelViewModel;
    type Capabilities = ();
    type Effect = Effect;

    fn update(
        &self,
        event: Self::Event,
        model: &mut Self::Model,
        _caps: &Self::Capabilities,
    ) -> Command<Self::Effect, Self::Event> {
        let try_fn = self.update_inner(event);

        match try_fn(model) {
            Err(e) => {
                model
                    .error
                    .replace((chrono::DateTime::from(SystemTime::now()), format!("{:?}", e)));
                render::render()
            }
            Ok(command) => {
                model.error.take();
                command
            }
        }
    }

    fn view(&self, model: &Self::Model) -> Self::ViewModel {
        let Projection {
            effective,
            provisional,
            initialized,
        } = model.state.read();

        let view_model = PanelViewModel {
            state: effective.cloned(),
            pending: provisional,
            disabled: !initialized,
            error: model.error.clone(),
        };

        trace!("view model: {:?}", view_model);

        view_model
    }
}

#[derive(Error, Debug)]
enum AppError {
    #[error("Operation requires a connected machine")]
    OperationRequiresMachine,
    #[error("Command rejected. cause: {0}")]
    CommandRejected(machine_commander::MachineCommanderError),
}

#[cfg(test)]
mod app_tests {
    use crux_core::{assert_effect, testing::AppTester};
    use rstest::rstest;

    use super::effects::machine_commander::MachineCommanderError;
    use super::*;

    fn machine() -> MachineIdentificationUnique {
        MachineIdentificationUnique::new(machines::pellet::MACHINE_IDENTIFICATION, 1)
    }

    fn snapshot(frequency_target: f64) -> StateEvent {
        StateEvent {
            is_default_state: false,
            inverter_state: InverterState {
                frequency_target,
                ..InverterState::default()
            },
            laser_state: LaserState::default(),
        }
    }

    fn connected_app() -> (AppTester<Panel>, Model) {
        let app = AppTester::<Panel>::default();
        let mut model = Model::default();

        app.update(
            Event::Connect {
                machine_identification_unique: machine(),
            },
            &mut model,
        );

        (app, model)
    }

    fn requested_mutations(update: crux_core::testing::Update<Effect, Event>) -> Vec<MachineCommanderOperation> {
        update
            .effects
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::MachineCommander(request) => Some(request.operation.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn minimal() {
        let app = AppTester::<Panel>::default();
        let mut model = Model::default();

        let update = app.update(Event::None, &mut model);

        assert_effect!(update, Effect::Render(_));

        let actual_view = &app.view(&model);
        let expected_view = PanelViewModel::default();
        assert_eq!(actual_view, &expected_view);
    }

    #[test]
    fn controls_are_disabled_until_the_first_snapshot() {
        let (app, mut model) = connected_app();

        assert!(app.view(&model).disabled);

        let update = app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );

        assert_effect!(update, Effect::Render(_));
        let view = app.view(&model);
        assert!(!view.disabled);
        assert!(!view.pending);
        assert_eq!(view.state, Some(snapshot(10.0)));
    }

    #[test]
    fn setpoint_applies_overlay_and_requests_the_mutation() {
        let (app, mut model) = connected_app();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );

        let update = app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );

        let view = app.view(&model);
        assert_eq!(view.state, Some(snapshot(42.0)));
        assert!(view.pending);

        assert_eq!(requested_mutations(update), vec![MachineCommanderOperation::Mutate {
            machine_identification_unique: machine(),
            mutation: Mutation::SetFrequencyTarget(42.0),
        }]);
    }

    #[rstest]
    #[case(
        Event::SetRunState { run_state: RunState::Forward },
        Mutation::SetRunState(RunState::Forward)
    )]
    #[case(
        Event::SetAccelerationLevel { acceleration_level: RampLevel::from_raw(9) },
        Mutation::SetAccelerationLevel(RampLevel::from_raw(9))
    )]
    #[case(
        Event::SetDecelerationLevel { deceleration_level: RampLevel::from_raw(3) },
        Mutation::SetDecelerationLevel(RampLevel::from_raw(3))
    )]
    #[case(
        Event::SetTargetDiameter { target_diameter: 1.75 },
        Mutation::SetTargetDiameter(1.75)
    )]
    #[case(
        Event::SetLowerTolerance { lower_tolerance: 0.05 },
        Mutation::SetLowerTolerance(0.05)
    )]
    #[case(
        Event::SetHigherTolerance { higher_tolerance: 0.1 },
        Mutation::SetHigherTolerance(0.1)
    )]
    fn each_setpoint_requests_its_mutation(#[case] event: Event, #[case] expected: Mutation) {
        let (app, mut model) = connected_app();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );

        let update = app.update(event, &mut model);

        assert_eq!(requested_mutations(update), vec![MachineCommanderOperation::Mutate {
            machine_identification_unique: machine(),
            mutation: expected,
        }]);
        assert!(app.view(&model).pending);
    }

    #[test]
    fn second_setpoint_while_pending_is_dropped() {
        let (app, mut model) = connected_app();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );
        app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );

        let update = app.update(
            Event::SetFrequencyTarget {
                frequency_target: 99.0,
            },
            &mut model,
        );

        // no command goes out and the view reflects only the first intent
        assert_eq!(requested_mutations(update), vec![]);
        let view = app.view(&model);
        assert_eq!(view.state, Some(snapshot(42.0)));
        assert!(view.pending);
        assert_eq!(view.error, None);
    }

    #[test]
    fn snapshot_confirms_the_outstanding_setpoint() {
        let (app, mut model) = connected_app();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );
        app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );

        app.update(
            Event::StateArrived {
                state: snapshot(42.0),
            },
            &mut model,
        );

        let view = app.view(&model);
        assert_eq!(view.state, Some(snapshot(42.0)));
        assert!(!view.pending);
    }

    #[test]
    fn snapshot_with_the_old_value_supersedes_the_setpoint() {
        // The hardware ignored the command: the panel shows the authoritative
        // old value again instead of keeping the stale intent.
        let (app, mut model) = connected_app();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );
        app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );

        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );

        let view = app.view(&model);
        assert_eq!(view.state, Some(snapshot(10.0)));
        assert!(!view.pending);
    }

    #[test]
    fn delivery_success_does_not_confirm_the_setpoint() {
        let (app, mut model) = connected_app();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );
        app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );

        app.update(Event::MutationCompleted(MachineCommanderResult::Ok), &mut model);

        // still pending until the feed shows it
        let view = app.view(&model);
        assert_eq!(view.state, Some(snapshot(42.0)));
        assert!(view.pending);
    }

    #[test]
    fn delivery_failure_reverts_the_setpoint_and_records_the_error() {
        let (app, mut model) = connected_app();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );
        app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );

        let update = app.update(
            Event::MutationCompleted(MachineCommanderResult::Err {
                error: MachineCommanderError::Request {
                    message: "controller unreachable".to_string(),
                },
            }),
            &mut model,
        );

        assert_effect!(update, Effect::Render(_));
        let view = app.view(&model);
        assert_eq!(view.state, Some(snapshot(10.0)));
        assert!(!view.pending);
        assert!(view.error.is_some());
    }

    #[test]
    fn late_delivery_failure_only_records_the_error() {
        // A snapshot already resolved the overlay; a failure arriving after
        // it must not disturb the now-authoritative state.
        let (app, mut model) = connected_app();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );
        app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );
        app.update(
            Event::StateArrived {
                state: snapshot(42.0),
            },
            &mut model,
        );

        app.update(
            Event::MutationCompleted(MachineCommanderResult::Err {
                error: MachineCommanderError::Request {
                    message: "timed out".to_string(),
                },
            }),
            &mut model,
        );

        let view = app.view(&model);
        assert_eq!(view.state, Some(snapshot(42.0)));
        assert!(!view.pending);
        assert!(view.error.is_some());
    }

    #[test]
    fn setpoint_without_a_connected_machine_records_an_error() {
        let app = AppTester::<Panel>::default();
        let mut model = Model::default();
        app.update(
            Event::StateArrived {
                state: snapshot(10.0),
            },
            &mut model,
        );

        let update = app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );

        assert_eq!(requested_mutations(update), vec![]);
        let view = app.view(&model);
        assert_eq!(view.state, Some(snapshot(10.0)));
        assert!(!view.pending);
        assert!(view.error.is_some());
    }

    #[test]
    fn setpoint_before_the_first_snapshot_is_ignored() {
        let (app, mut model) = connected_app();

        let update = app.update(
            Event::SetFrequencyTarget {
                frequency_target: 42.0,
            },
            &mut model,
        );

        assert_eq!(requested_mutations(update), vec![]);
        let view = app.view(&model);
        assert_eq!(view.state, None);
        assert!(view.disabled);
        assert_eq!(view.error, None);
    }
}
