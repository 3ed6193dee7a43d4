use std::collections::HashSet;

use bitcoin::Amount;

use super::TxLeg;

/// Result of separating change from real transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetTransfer<'a> {
    /// Sum of outputs going to addresses not among the inputs.
    pub net_value: Amount,
    pub external_outputs: Vec<&'a TxLeg>,
}

/// Set of addresses spending into the transaction.
pub fn input_address_set<'a, I>(addresses: I) -> HashSet<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    addresses.into_iter().collect()
}

/// Compute the value actually moved to new addresses.
///
/// Any output whose address also appears among the inputs counts as change,
/// even if a third party controls that same address. The result is never
/// larger than the raw output sum.
pub fn compute_net_transfer<'a>(inputs: &[TxLeg], outputs: &'a [TxLeg]) -> NetTransfer<'a> {
    let spenders = input_address_set(inputs.iter().map(|i| i.address.as_str()));

    let external_outputs: Vec<&TxLeg> = outputs
        .iter()
        .filter(|o| !spenders.contains(o.address.as_str()))
        .collect();

    let net_sat = external_outputs
        .iter()
        .fold(0u64, |acc, o| acc.saturating_add(o.value.to_sat()));

    NetTransfer {
        net_value: Amount::from_sat(net_sat),
        external_outputs,
    }
}

/// Strictly greater than: a transfer of exactly `threshold` is not a whale.
pub fn is_whale(net_value: Amount, threshold: Amount) -> bool {
    net_value > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc(value: f64) -> Amount {
        Amount::from_sat((value * 100_000_000.0).round() as u64)
    }

    fn leg(address: &str, value: f64) -> TxLeg {
        TxLeg::new(address, btc(value))
    }

    #[test]
    fn self_change_is_excluded() {
        // 2104 BTC in, nearly everything back to the spender
        let inputs = vec![leg("bc1qwhale", 2104.0)];
        let outputs = vec![leg("bc1qwhale", 2103.9906), leg("bc1qsomeone", 0.0094)];

        let net = compute_net_transfer(&inputs, &outputs);
        assert_eq!(net.net_value, btc(0.0094));
        assert_eq!(net.external_outputs.len(), 1);
        assert_eq!(net.external_outputs[0].address, "bc1qsomeone");
        assert!(!is_whale(net.net_value, btc(200.0)));
    }

    #[test]
    fn all_change_nets_to_zero() {
        let inputs = vec![leg("a", 500.0), leg("b", 500.0)];
        let outputs = vec![leg("a", 600.0), leg("b", 399.9)];

        let net = compute_net_transfer(&inputs, &outputs);
        assert_eq!(net.net_value, Amount::ZERO);
        assert!(net.external_outputs.is_empty());
        assert!(!is_whale(net.net_value, btc(200.0)));
    }

    #[test]
    fn no_outputs_nets_to_zero() {
        let inputs = vec![leg("a", 1.0)];
        let net = compute_net_transfer(&inputs, &[]);
        assert_eq!(net.net_value, Amount::ZERO);
    }

    #[test]
    fn multiple_external_outputs_sum() {
        let inputs = vec![leg("a", 1000.0)];
        let outputs = vec![leg("x", 300.0), leg("a", 100.0), leg("y", 250.5)];

        let net = compute_net_transfer(&inputs, &outputs);
        assert_eq!(net.net_value, btc(550.5));
        assert!(is_whale(net.net_value, btc(200.0)));
    }

    #[test]
    fn net_never_exceeds_raw_output_sum() {
        let inputs = vec![leg("a", 10.0), leg("c", 5.0)];
        let outputs = vec![leg("b", 7.0), leg("c", 3.0), leg("d", 4.0)];
        let raw: u64 = outputs.iter().map(|o| o.value.to_sat()).sum();

        let net = compute_net_transfer(&inputs, &outputs);
        assert!(net.net_value.to_sat() <= raw);
        assert_eq!(net.net_value, btc(11.0));
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        assert!(!is_whale(btc(200.0), btc(200.0)));
        assert!(is_whale(Amount::from_sat(btc(200.0).to_sat() + 1), btc(200.0)));
        assert!(!is_whale(btc(199.99999999), btc(200.0)));
    }
}
