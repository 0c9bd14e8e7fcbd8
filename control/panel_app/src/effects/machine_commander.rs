use std::future::Future;

use crux_core::capability::Operation;
use crux_core::command::RequestBuilder;
use crux_core::{Command, Request};
use machines::pellet::Mutation;
use machines::MachineIdentificationUnique;
use thiserror::Error;

/// Asks the shell to deliver a [`Mutation`] to the machine controller.
///
/// The output only reports delivery: a delivered command may still be ignored
/// by the hardware. Confirmation of the actual change arrives, if at all, via
/// the state feed.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub enum MachineCommanderOperation {
    Mutate {
        machine_identification_unique: MachineIdentificationUnique,
        mutation: Mutation,
    },
}

impl Operation for MachineCommanderOperation {
    type Output = MachineCommanderResult;
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub enum MachineCommanderResult {
    Ok,
    Err { error: MachineCommanderError },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Error)]
#[serde(rename_all = "camelCase")]
pub enum MachineCommanderError {
    #[error("request failed: {message}")]
    Request { message: String },
}

pub fn mutate_builder<Effect, Event>(
    machine_identification_unique: MachineIdentificationUnique,
    mutation: Mutation,
) -> RequestBuilder<Effect, Event, impl Future<Output = MachineCommanderResult>>
where
    Effect: From<Request<MachineCommanderOperation>> + Send + 'static,
    Event: Send + 'static,
{
    Command::request_from_shell(MachineCommanderOperation::Mutate {
        machine_identification_unique,
        mutation,
    })
}
