use super::netflow::input_address_set;
use super::{Classification, ExchangeDetails};
use crate::tags::{ExchangeMatch, ExchangeRegistry, FlowDirection};
use tracing::debug;

/// Label a transfer by its exchange relationship.
///
/// Inputs are checked as-is. Outputs are checked only when they are not
/// change, i.e. not one of the input addresses. When both sides match
/// (`Mixed`), the details name the first matching input.
pub fn classify<'a, I, O>(
    input_addresses: I,
    output_addresses: O,
    registry: &ExchangeRegistry,
) -> (Classification, Option<ExchangeDetails>)
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: Clone,
    O: IntoIterator<Item = &'a str>,
{
    let inputs = input_addresses.into_iter();
    let spenders = input_address_set(inputs.clone());

    let from_exchange = registry.check_addresses(inputs, FlowDirection::FromExchange);
    let to_exchange = registry.check_addresses(
        output_addresses
            .into_iter()
            .filter(|address| !spenders.contains(address)),
        FlowDirection::ToExchange,
    );

    match (from_exchange.first(), to_exchange.first()) {
        (Some(hit), None) => (Classification::Outflow, Some(details(hit))),
        (None, Some(hit)) => (Classification::Inflow, Some(details(hit))),
        (Some(hit), Some(_)) => (Classification::Mixed, Some(details(hit))),
        (None, None) => (Classification::Unknown, None),
    }
}

fn details(hit: &ExchangeMatch<'_>) -> ExchangeDetails {
    debug!(
        address = hit.address,
        exchange = hit.exchange,
        direction = ?hit.direction,
        "Exchange address matched"
    );
    ExchangeDetails {
        exchange_address: hit.address.to_string(),
        exchange_name: hit.exchange.to_string(),
    }
}
