//! Fee and amount computation. All amounts are integer minor units.

use crate::config::ReconciliationSettings;
use crate::payments::types::{NetworkProfile, ProviderName};

/// Wave fee: 1% of the amount sent, rounded up to the next multiple of 5.
pub fn fee_wave(amount: i64) -> i64 {
    if amount <= 0 {
        return 0;
    }
    (amount + 499) / 500 * 5
}

/// Total the sender pays so that the recipient receives at least `desired`.
/// The recipient gets the amount sent and the fee is charged on top of it, so
/// the smallest amount sent is `desired` itself.
pub fn total_amount_to_send(desired: i64) -> i64 {
    let sent = desired.max(0);
    sent + fee_wave(sent)
}

/// Smallest gross `t` with `t - fee_wave(t) >= net`, for gateways that deduct
/// the fee from the gross amount.
pub fn gross_for_net(net: i64) -> i64 {
    let mut total = net.max(0);
    while total - fee_wave(total) < net {
        total += 1;
    }
    total
}

/// `round(amount - amount / 100)` with ties to even.
pub fn ussd_markdown(amount: i64) -> i64 {
    let scaled = amount * 99;
    let (quotient, remainder) = (scaled.div_euclid(100), scaled.rem_euclid(100));
    if remainder > 50 || (remainder == 50 && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    }
}

/// `percent` of `amount`, rounded down.
pub fn percent_of(amount: i64, percent: f64) -> i64 {
    if amount <= 0 || percent <= 0.0 {
        return 0;
    }
    (amount as f64 * percent / 100.0).floor() as i64
}

fn wave_without_customer_fee(network: &NetworkProfile) -> bool {
    network.is("wave") && !network.customer_pays_fee
}

fn ussd_fee_waived(network: &NetworkProfile, settings: &ReconciliationSettings) -> bool {
    (network.is("mtn") && settings.mtn_not_fee) || (network.is("moov") && settings.moov_not_fee)
}

/// Amount requested from the payer's phone for a deposit.
pub fn collection_amount(
    amount: i64,
    network: &NetworkProfile,
    gateway: ProviderName,
    settings: &ReconciliationSettings,
) -> i64 {
    if wave_without_customer_fee(network) {
        return total_amount_to_send(amount);
    }
    let marked_down_network = ["mtn", "moov", "orange"].iter().any(|n| network.is(n));
    if gateway == ProviderName::ConnectUssd
        && network.in_country("ci")
        && marked_down_network
        && !ussd_fee_waived(network, settings)
    {
        return ussd_markdown(amount);
    }
    amount
}

/// Amount sent to the recipient's phone for a withdrawal or disbursement.
pub fn payout_amount(amount: i64, network: &NetworkProfile) -> i64 {
    if wave_without_customer_fee(network) {
        total_amount_to_send(amount)
    } else {
        amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::NetworkApi;

    fn network(name: &str, country: &str, customer_pays_fee: bool) -> NetworkProfile {
        NetworkProfile {
            name: name.to_string(),
            country_code: country.to_string(),
            deposit_api: NetworkApi::Connect,
            withdrawal_api: NetworkApi::Connect,
            payment_by_link: false,
            customer_pays_fee,
            manual_processing: false,
        }
    }

    #[test]
    fn wave_fee_rounds_up_to_multiple_of_five() {
        assert_eq!(fee_wave(1000), 10);
        assert_eq!(fee_wave(2000), 20);
        assert_eq!(fee_wave(1), 5);
        assert_eq!(fee_wave(500), 5);
        assert_eq!(fee_wave(501), 10);
        assert_eq!(fee_wave(0), 0);
    }

    #[test]
    fn total_to_send_matches_worked_examples() {
        assert_eq!(total_amount_to_send(1000), 1010);
        assert_eq!(total_amount_to_send(2000), 2020);
        for x in [1, 7, 499, 500, 501, 12_345, 250_000] {
            let total = total_amount_to_send(x);
            assert!(total - fee_wave(x) >= x);
            assert_eq!(total - fee_wave(x), x);
        }
    }

    #[test]
    fn gross_for_net_is_minimal() {
        for net in [1, 5, 495, 1000, 2000, 9_999, 100_000] {
            let gross = gross_for_net(net);
            assert!(gross - fee_wave(gross) >= net);
            assert!(gross - 1 - fee_wave(gross - 1) < net);
        }
        assert_eq!(gross_for_net(1000), 1015);
    }

    #[test]
    fn ussd_markdown_rounds_half_to_even() {
        assert_eq!(ussd_markdown(1000), 990);
        assert_eq!(ussd_markdown(250), 248);
        assert_eq!(ussd_markdown(150), 148);
        assert_eq!(ussd_markdown(1234), 1222);
    }

    #[test]
    fn collection_amount_policies() {
        let settings = ReconciliationSettings::default();
        let wave = network("wave", "ci", false);
        assert_eq!(
            collection_amount(2000, &wave, ProviderName::ConnectLink, &settings),
            2020
        );
        let wave_paying = network("wave", "ci", true);
        assert_eq!(
            collection_amount(2000, &wave_paying, ProviderName::ConnectLink, &settings),
            2000
        );

        let mtn_ci = network("mtn", "ci", true);
        assert_eq!(
            collection_amount(1000, &mtn_ci, ProviderName::ConnectUssd, &settings),
            990
        );
        let waived = ReconciliationSettings {
            mtn_not_fee: true,
            ..ReconciliationSettings::default()
        };
        assert_eq!(
            collection_amount(1000, &mtn_ci, ProviderName::ConnectUssd, &waived),
            1000
        );

        let mtn_bj = network("mtn", "bj", true);
        assert_eq!(
            collection_amount(1000, &mtn_bj, ProviderName::Feexpay, &settings),
            1000
        );
    }

    #[test]
    fn percent_of_rounds_down() {
        assert_eq!(percent_of(2000, 1.0), 20);
        assert_eq!(percent_of(1999, 1.0), 19);
        assert_eq!(percent_of(1000, 0.0), 0);
        assert_eq!(percent_of(1000, 2.5), 25);
    }
}
