//! Rebuilds the economics of one rune transaction from its transfer events.
//!
//! Amounts are accumulated in the rune's smallest unit and only converted to
//! display units (5 decimals for DOG) when the result is built.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use crate::models::{RawTransferEvent, TransferDirection};

pub const DOG_RUNE_ID: &str = "840000:3";
pub const DOG_DECIMALS: u32 = 5;
pub const DOG_UNITS_PER_TOKEN: u64 = 10u64.pow(DOG_DECIMALS);
/// Net transfers below 0.00001 DOG count as nothing leaving the senders.
const NET_TRANSFER_EPSILON_UNITS: u128 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    ReceiveOnly,
    Burn,
    Consolidation,
    Split,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sender {
    pub address: String,
    pub amount: u64,
    pub amount_dog: f64,
    pub has_dog: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receiver {
    pub address: String,
    pub amount: u64,
    pub amount_dog: f64,
    pub has_dog: bool,
    pub is_change: bool,
}

/// Integer totals behind the display fields. Wider than a single amount so
/// that summing many large events cannot overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferTotals {
    pub total_in: u128,
    pub total_out: u128,
    pub to_self: u128,
    pub net_transfer: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedTransaction {
    pub txid: String,
    pub block_height: Option<u64>,
    pub timestamp: Option<Value>,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub senders: Vec<Sender>,
    pub receivers: Vec<Receiver>,
    pub sender_count: usize,
    pub receiver_count: usize,
    pub total_dog_in: f64,
    pub total_dog_out: f64,
    pub total_dog_moved: f64,
    pub net_transfer: f64,
    pub change_amount: f64,
    pub has_change: bool,
    #[serde(skip)]
    pub totals: TransferTotals,
}

/// Smallest units to DOG. A single correctly-rounded division, so the
/// result is the nearest f64 to the 5-decimal value.
pub fn to_display(units: impl Into<u128>) -> f64 {
    units.into() as f64 / DOG_UNITS_PER_TOKEN as f64
}

/// Events for `txid` carrying the expected rune id. Events of the same
/// transaction tagged with another rune are dropped with a warning.
pub fn filter_events(events: Vec<RawTransferEvent>, txid: &str, rune_id: &str) -> Vec<RawTransferEvent> {
    events
        .into_iter()
        .filter(|e| e.txid == txid)
        .filter(|e| {
            if e.rune_id == rune_id {
                return true;
            }
            if !e.rune_id.is_empty() {
                warn!(txid = %e.txid, rune_id = %e.rune_id, "⚠️ Ignoring event for a different rune");
            }
            false
        })
        .collect()
}

fn assign_type(senders: usize, receivers: usize, net_transfer: u128) -> TransactionType {
    if senders == 0 {
        TransactionType::ReceiveOnly
    } else if receivers == 0 {
        TransactionType::Burn
    } else if net_transfer < NET_TRANSFER_EPSILON_UNITS {
        if senders > receivers {
            TransactionType::Consolidation
        } else {
            TransactionType::Split
        }
    } else if senders > 1 && receivers == 1 {
        TransactionType::Consolidation
    } else {
        TransactionType::Transfer
    }
}

/// Classify the events of a single transaction. Returns `None` when there
/// are no events. All events are expected to share one txid and rune.
pub fn classify(events: &[RawTransferEvent]) -> Option<ClassifiedTransaction> {
    let first = events.first()?;

    let mut senders = Vec::new();
    let mut sending_addresses: HashSet<&str> = HashSet::new();
    let mut totals = TransferTotals::default();

    for send in events.iter().filter(|e| e.event == TransferDirection::Send) {
        sending_addresses.insert(send.address.as_str());
        totals.total_in += u128::from(send.amount);
        senders.push(Sender {
            address: send.address.clone(),
            amount: send.amount,
            amount_dog: to_display(send.amount),
            has_dog: true,
        });
    }

    let mut receivers = Vec::new();
    for receive in events.iter().filter(|e| e.event == TransferDirection::Receive) {
        let is_change = sending_addresses.contains(receive.address.as_str());
        totals.total_out += u128::from(receive.amount);
        if is_change {
            totals.to_self += u128::from(receive.amount);
        }
        receivers.push(Receiver {
            address: receive.address.clone(),
            amount: receive.amount,
            amount_dog: to_display(receive.amount),
            has_dog: true,
            is_change,
        });
    }

    totals.net_transfer = totals.total_out - totals.to_self;
    let tx_type = assign_type(senders.len(), receivers.len(), totals.net_transfer);

    Some(ClassifiedTransaction {
        txid: first.txid.clone(),
        block_height: first.block_height,
        timestamp: first.timestamp.clone(),
        tx_type,
        sender_count: senders.len(),
        receiver_count: receivers.len(),
        senders,
        receivers,
        total_dog_in: to_display(totals.total_in),
        total_dog_out: to_display(totals.total_out),
        total_dog_moved: to_display(totals.total_out),
        net_transfer: to_display(totals.net_transfer),
        change_amount: to_display(totals.to_self),
        has_change: totals.to_self > 0,
        totals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(direction: TransferDirection, address: &str, amount: u64) -> RawTransferEvent {
        RawTransferEvent {
            txid: "a".to_string(),
            address: address.to_string(),
            amount,
            event: direction,
            rune_id: DOG_RUNE_ID.to_string(),
            block_height: Some(900_000),
            timestamp: None,
        }
    }

    fn send(address: &str, amount: u64) -> RawTransferEvent {
        event(TransferDirection::Send, address, amount)
    }

    fn receive(address: &str, amount: u64) -> RawTransferEvent {
        event(TransferDirection::Receive, address, amount)
    }

    #[test]
    fn test_simple_transfer() {
        let tx = classify(&[send("X", 500_000), receive("Y", 480_000)]).unwrap();
        assert_eq!(tx.tx_type, TransactionType::Transfer);
        assert_eq!(tx.net_transfer, 4.8);
        assert!(!tx.has_change);
        assert_eq!(tx.total_dog_in, 5.0);
        assert_eq!(tx.change_amount, 0.0);
    }

    #[test]
    fn test_change_is_netted() {
        let tx = classify(&[send("X", 1_000_000), receive("Y", 300_000), receive("X", 699_000)]).unwrap();
        assert_eq!(tx.tx_type, TransactionType::Transfer);
        assert!(tx.has_change);
        assert_eq!(tx.change_amount, 6.99);
        assert_eq!(tx.net_transfer, 3.0);
        assert!(tx.receivers[1].is_change);
        assert!(!tx.receivers[0].is_change);
    }

    #[test]
    fn test_receive_only_and_burn() {
        let tx = classify(&[receive("Y", 10)]).unwrap();
        assert_eq!(tx.tx_type, TransactionType::ReceiveOnly);

        let tx = classify(&[send("X", 10)]).unwrap();
        assert_eq!(tx.tx_type, TransactionType::Burn);
    }

    #[test]
    fn test_zero_net_consolidation_vs_split() {
        // Everything returns to the senders: fewer outputs than inputs
        let tx = classify(&[send("X", 100), send("Z", 100), receive("X", 200)]).unwrap();
        assert_eq!(tx.tx_type, TransactionType::Consolidation);

        let tx = classify(&[send("X", 200), receive("X", 100), receive("X", 100)]).unwrap();
        assert_eq!(tx.tx_type, TransactionType::Split);
    }

    #[test]
    fn test_many_senders_one_receiver_with_value_moving() {
        let tx = classify(&[send("X", 100), send("Z", 100), receive("Y", 200)]).unwrap();
        assert_eq!(tx.tx_type, TransactionType::Consolidation);
    }

    #[test]
    fn test_epsilon_is_one_unit() {
        // One smallest unit leaving the sender set is a real transfer
        let tx = classify(&[send("X", 100), receive("X", 99), receive("Y", 1)]).unwrap();
        assert_eq!(tx.tx_type, TransactionType::Transfer);
        assert_eq!(tx.net_transfer, 0.00001);
    }

    #[test]
    fn test_partition_law() {
        let events = vec![
            send("A", 7),
            send("B", 11),
            send("A", 13),
            receive("A", 5),
            receive("C", 17),
            receive("B", 9),
        ];
        let tx = classify(&events).unwrap();
        assert_eq!(tx.senders.len() + tx.receivers.len(), events.len());
        assert_eq!(tx.sender_count, 3);
        assert!(tx.totals.to_self <= tx.totals.total_out);
        assert_eq!(tx.totals.net_transfer, 17);
    }

    #[test]
    fn test_amounts_near_u64_max_do_not_overflow() {
        let half = u64::MAX / 2 + 1;
        let tx = classify(&[send("X", half), send("Z", half), receive("Y", u64::MAX), receive("X", half)]).unwrap();
        assert_eq!(tx.totals.total_in, u128::from(u64::MAX) + 1);
        assert_eq!(tx.totals.total_out, u128::from(u64::MAX) + u128::from(half));
        assert_eq!(tx.totals.to_self, u128::from(half));
        assert_eq!(tx.totals.net_transfer, u128::from(u64::MAX));
        assert_eq!(tx.tx_type, TransactionType::Transfer);
        assert!(tx.net_transfer > 1.8e14);
    }

    #[test]
    fn test_filter_events_drops_other_runes_and_txids() {
        let mut foreign = send("X", 1);
        foreign.rune_id = "1:0".to_string();
        let mut other_tx = send("X", 1);
        other_tx.txid = "b".to_string();
        let kept = filter_events(vec![send("X", 5), foreign, other_tx], "a", DOG_RUNE_ID);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].amount, 5);
    }

    #[test]
    fn test_empty_events() {
        assert!(classify(&[]).is_none());
    }

    #[test]
    fn test_serialized_shape() {
        let tx = classify(&[send("X", 500_000), receive("Y", 480_000)]).unwrap();
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "transfer");
        assert_eq!(json["net_transfer"], 4.8);
        assert_eq!(json["senders"][0]["amount_dog"], 5.0);
        assert!(json.get("totals").is_none());
    }
}
