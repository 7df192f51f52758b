mod common;

use common::*;
use namepay::domain::schedule::{Interval, NewSchedule};
use namepay::error::PaymentError;
use namepay::infrastructure::simulated::Transfer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[tokio::test]
async fn test_scenario_c_eager_catch_up() {
    let h = harness();
    h.claim("alice", "A", "B").await;
    let schedule = h
        .schedule("alice", 100, Interval::Weekly, false, START + DAY)
        .await;
    assert_eq!(schedule.next_payout, START + DAY);

    h.clock.advance(22 * DAY);
    let payout = h
        .engine
        .execute_schedule(&name("alice"), &schedule.id)
        .await
        .unwrap();
    assert_eq!(payout.periods, 4);
    assert_eq!(payout.amount, 400);
    assert_eq!(payout.recipient, addr("B"));

    let after = h.engine.schedule(&name("alice"), &schedule.id).await.unwrap();
    assert_eq!(after.next_payout, schedule.next_payout + 4 * 7 * DAY);
    assert_eq!(
        h.network.transfers(),
        vec![Transfer {
            token: usdc(),
            to: addr("B"),
            amount: 400,
        }]
    );
}

#[tokio::test]
async fn test_scenario_d_past_first_payment_date() {
    let h = harness();
    h.claim("alice", "A", "B").await;

    for first_payment_date in [START - 1, START] {
        let err = h
            .engine
            .create_schedule(
                &manager(),
                &name("alice"),
                NewSchedule {
                    token: usdc(),
                    amount: 100,
                    interval: Interval::Daily,
                    is_one_time: false,
                    first_payment_date,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidFirstPaymentDate { .. }));
    }
    assert!(h.engine.schedules_of(&name("alice")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_schedule_validation() {
    let h = harness();
    let params = NewSchedule {
        token: usdc(),
        amount: 100,
        interval: Interval::Daily,
        is_one_time: false,
        first_payment_date: START + DAY,
    };

    let err = h
        .engine
        .create_schedule(&manager(), &name("ghost"), params.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::UsernameNotFound(_)));

    h.claim("alice", "A", "B").await;
    let zero_amount = NewSchedule {
        amount: 0,
        ..params.clone()
    };
    assert!(matches!(
        h.engine
            .create_schedule(&manager(), &name("alice"), zero_amount)
            .await,
        Err(PaymentError::ZeroAmount)
    ));
    let zero_token = NewSchedule {
        token: namepay::domain::address::Address::ZERO,
        ..params
    };
    assert!(matches!(
        h.engine
            .create_schedule(&manager(), &name("alice"), zero_token)
            .await,
        Err(PaymentError::ZeroToken)
    ));
}

#[tokio::test]
async fn test_execution_before_due_date_fails() {
    let h = harness();
    h.claim("alice", "A", "B").await;
    let schedule = h
        .schedule("alice", 100, Interval::Daily, false, START + DAY)
        .await;

    let err = h
        .engine
        .execute_schedule(&name("alice"), &schedule.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PaymentNotDue { .. }));
    assert!(h.network.transfers().is_empty());
}

#[tokio::test]
async fn test_catch_up_is_capped_and_converges() {
    let h = harness();
    h.claim("alice", "A", "B").await;
    let first = START + DAY;
    let schedule = h.schedule("alice", 7, Interval::Daily, false, first).await;
    h.clock.set(first + 30 * DAY);

    let mut periods = Vec::new();
    for _ in 0..4 {
        let payout = h
            .engine
            .execute_schedule(&name("alice"), &schedule.id)
            .await
            .unwrap();
        periods.push(payout.periods);
    }
    assert_eq!(periods, vec![10, 10, 10, 1]);
    let total: u128 = h.network.transfers().iter().map(|t| t.amount).sum();
    assert_eq!(total, 31 * 7);

    let after = h.engine.schedule(&name("alice"), &schedule.id).await.unwrap();
    assert_eq!(after.next_payout, first + 31 * DAY);
    assert!(matches!(
        h.engine.execute_schedule(&name("alice"), &schedule.id).await,
        Err(PaymentError::PaymentNotDue { .. })
    ));
}

#[tokio::test]
async fn test_catch_up_property() {
    let intervals = [
        Interval::Daily,
        Interval::Weekly,
        Interval::BiWeekly,
        Interval::Monthly,
        Interval::Quarterly,
        Interval::SemiAnnual,
        Interval::Yearly,
    ];
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..50 {
        let h = harness();
        h.claim("alice", "A", "B").await;
        let interval = intervals[rng.gen_range(0..intervals.len())];
        let amount: u128 = rng.gen_range(1..1_000_000);
        let first = START + rng.gen_range(1..30 * DAY);
        let schedule = h.schedule("alice", amount, interval, false, first).await;

        let elapsed = rng.gen_range(0..15 * interval.seconds());
        h.clock.set(first + elapsed);
        let payout = h
            .engine
            .execute_schedule(&name("alice"), &schedule.id)
            .await
            .unwrap();

        let expected = (1 + elapsed / interval.seconds()).min(10);
        assert_eq!(payout.periods, expected);
        assert_eq!(payout.amount, amount * u128::from(expected));

        let after = h.engine.schedule(&name("alice"), &schedule.id).await.unwrap();
        assert_eq!(after.next_payout, first + expected * interval.seconds());
        assert!(after.next_payout >= after.first_payment_date);
        assert_eq!(
            (after.next_payout - after.first_payment_date) % interval.seconds(),
            0
        );
    }
}

#[tokio::test]
async fn test_one_time_schedule_pays_once() {
    let h = harness();
    h.claim("alice", "A", "B").await;
    let schedule = h
        .schedule("alice", 500, Interval::Monthly, true, START + DAY)
        .await;
    h.clock.advance(400 * DAY);

    let payout = h
        .engine
        .execute_schedule(&name("alice"), &schedule.id)
        .await
        .unwrap();
    assert_eq!(payout.periods, 1);
    assert_eq!(payout.amount, 500);

    let after = h.engine.schedule(&name("alice"), &schedule.id).await.unwrap();
    assert!(!after.active);
    assert!(matches!(
        h.engine.execute_schedule(&name("alice"), &schedule.id).await,
        Err(PaymentError::ScheduleNotActive(_))
    ));
    assert!(h.engine.schedules_of(&name("alice")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recipient_is_resolved_at_execution() {
    let h = harness();
    h.claim("alice", "A", "B").await;
    let schedule = h
        .schedule("alice", 100, Interval::Daily, false, START + DAY)
        .await;
    h.engine
        .update_recipient(&addr("A"), &name("alice"), addr("C"))
        .await
        .unwrap();

    h.clock.set(START + DAY);
    let payout = h
        .engine
        .execute_schedule(&name("alice"), &schedule.id)
        .await
        .unwrap();
    assert_eq!(payout.recipient, addr("C"));
    assert_eq!(h.network.transfers()[0].to, addr("C"));
}

#[tokio::test]
async fn test_interval_update_rebases_series() {
    let h = harness();
    h.claim("alice", "A", "B").await;
    let first = START + DAY;
    let schedule = h.schedule("alice", 100, Interval::Weekly, false, first).await;
    h.clock.set(first + 8 * DAY);
    h.engine
        .execute_schedule(&name("alice"), &schedule.id)
        .await
        .unwrap();

    // The controller may edit without holding the manager role.
    let updated = h
        .engine
        .update_schedule_interval(&addr("A"), &name("alice"), &schedule.id, Interval::Daily)
        .await
        .unwrap();
    assert_eq!(updated.interval, Interval::Daily);
    assert_eq!(updated.first_payment_date, first + 14 * DAY);
    assert_eq!(updated.next_payout, first + 14 * DAY);

    let updated = h
        .engine
        .update_schedule_amount(&manager(), &name("alice"), &schedule.id, 250)
        .await
        .unwrap();
    assert_eq!(updated.amount, 250);

    let err = h
        .engine
        .update_schedule_amount(&addr("stranger"), &name("alice"), &schedule.id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Unauthorized { .. }));
}

#[tokio::test]
async fn test_cancel_schedule_does_not_prorate() {
    let h = harness();
    h.claim("alice", "A", "B").await;
    let first = START + DAY;
    let schedule = h.schedule("alice", 100, Interval::Monthly, false, first).await;
    h.clock.set(first + 15 * DAY);

    let cancelled = h
        .engine
        .cancel_schedule(&manager(), &name("alice"), &schedule.id)
        .await
        .unwrap();
    assert!(!cancelled.active);
    assert!(h.network.transfers().is_empty());

    assert!(matches!(
        h.engine.execute_schedule(&name("alice"), &schedule.id).await,
        Err(PaymentError::ScheduleNotActive(_))
    ));
    assert!(matches!(
        h.engine
            .update_schedule_amount(&manager(), &name("alice"), &schedule.id, 5)
            .await,
        Err(PaymentError::ScheduleNotActive(_))
    ));
    assert!(matches!(
        h.engine
            .cancel_schedule(&manager(), &name("alice"), &schedule.id)
            .await,
        Err(PaymentError::ScheduleNotActive(_))
    ));
}
