//! Integration tests for order composition and lifecycle rules.
//!
//! The property tests drive arbitrary sequences of item edits and check that
//! the total and subtotal invariants hold after every step.

use domain::{
    LineItem, Money, Order, OrderError, OrderState, PaymentMethod, PaymentReference, ProductId,
    UserId,
};
use proptest::prelude::*;

fn item(product: i64, quantity: u32, unit_price: i64) -> LineItem {
    LineItem::new(
        ProductId::new(product),
        quantity,
        Money::from_minor_units(unit_price),
    )
    .unwrap()
}

fn assert_invariants(order: &Order) {
    let mut sum = Money::zero();
    for item in order.items() {
        assert!(item.quantity() >= 1);
        assert_eq!(
            item.subtotal().minor_units(),
            item.unit_price().minor_units() * i64::from(item.quantity())
        );
        sum += item.subtotal();
    }
    assert_eq!(order.total(), sum);
}

#[derive(Debug, Clone)]
enum Edit {
    Add {
        product: i64,
        quantity: u32,
        unit_price: i64,
    },
    Remove {
        product: i64,
    },
    Update {
        product: i64,
        quantity: u32,
    },
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (1i64..6, 1u32..20, 0i64..1_000_000).prop_map(|(product, quantity, unit_price)| {
            Edit::Add {
                product,
                quantity,
                unit_price,
            }
        }),
        (1i64..6).prop_map(|product| Edit::Remove { product }),
        (1i64..6, 1u32..20).prop_map(|(product, quantity)| Edit::Update { product, quantity }),
    ]
}

proptest! {
    #[test]
    fn total_matches_items_after_every_edit(edits in prop::collection::vec(edit_strategy(), 0..40)) {
        let mut order = Order::new(UserId::new(1), "addr", PaymentMethod::Stripe);
        assert_invariants(&order);

        for edit in edits {
            match edit {
                Edit::Add { product, quantity, unit_price } => {
                    order.add_item(item(product, quantity, unit_price)).unwrap();
                }
                Edit::Remove { product } => {
                    order.remove_item(ProductId::new(product)).unwrap();
                    prop_assert!(order.item(ProductId::new(product)).is_none());
                }
                Edit::Update { product, quantity } => {
                    let found = order.update_item_quantity(ProductId::new(product), quantity).unwrap();
                    if found {
                        prop_assert_eq!(order.item(ProductId::new(product)).unwrap().quantity(), quantity);
                    }
                }
            }
            assert_invariants(&order);
        }
    }

    #[test]
    fn illegal_transitions_leave_order_unchanged(target_index in 0usize..5, paid in any::<bool>()) {
        let mut order = Order::with_items(
            UserId::new(2),
            "addr",
            PaymentMethod::Paypal,
            vec![item(1, 1, 100)],
        )
        .unwrap();
        if paid {
            order.mark_paid(PaymentReference::new("ref").unwrap()).unwrap();
        }

        let target = OrderState::ALL[target_index];
        let before = order.clone();
        let administrative = target != OrderState::Paid && order.state().can_transition_to(target);

        match order.transition_to(target) {
            Ok(()) => prop_assert!(administrative),
            Err(OrderError::InvalidTransition { from, to }) => {
                prop_assert!(!administrative);
                prop_assert_eq!(from, before.state());
                prop_assert_eq!(to, target);
                prop_assert_eq!(&order, &before);
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}

#[test]
fn order_creation_scenario() {
    let order = Order::with_items(
        UserId::new(10),
        "3 Kiln Road",
        PaymentMethod::BankTransfer,
        vec![item(1, 2, 50_000), item(3, 1, 25_000)],
    )
    .unwrap();

    assert_eq!(order.total(), Money::from_minor_units(125_000));
    assert_eq!(order.state(), OrderState::Pending);
    assert!(order.payment_reference().is_none());
}

#[test]
fn quantity_update_scenario() {
    let mut order = Order::with_items(
        UserId::new(10),
        "3 Kiln Road",
        PaymentMethod::Stripe,
        vec![item(1, 2, 50_000)],
    )
    .unwrap();
    assert_eq!(
        order.item(ProductId::new(1)).unwrap().subtotal(),
        Money::from_minor_units(100_000)
    );

    order.update_item_quantity(ProductId::new(1), 3).unwrap();

    assert_eq!(
        order.item(ProductId::new(1)).unwrap().subtotal(),
        Money::from_minor_units(150_000)
    );
    assert_eq!(order.total(), Money::from_minor_units(150_000));
}

#[test]
fn delivered_order_cannot_return_to_pending() {
    let mut order = Order::with_items(
        UserId::new(10),
        "3 Kiln Road",
        PaymentMethod::Stripe,
        vec![item(1, 1, 1_000)],
    )
    .unwrap();
    order
        .mark_paid(PaymentReference::new("pi_1").unwrap())
        .unwrap();
    order.transition_to(OrderState::Shipped).unwrap();
    order.transition_to(OrderState::Delivered).unwrap();

    let result = order.transition_to(OrderState::Pending);

    assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
    assert_eq!(order.state(), OrderState::Delivered);
}
