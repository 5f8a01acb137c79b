use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::Utc;

use haulbooks_core::{
    ActorContext, Aggregate, AggregateId, ExpectedVersion, Money, Role, TenantId, UserId,
};
use haulbooks_dispatch::{
    CreateShipment, DispatchShipment, FinancialsUpdated, MarkDelivered, Shipment, ShipmentCommand,
    ShipmentEvent, ShipmentId, UpdateFinancials,
};
use haulbooks_events::{EventBus, EventEnvelope, InMemoryEventBus};
use haulbooks_infra::audit_log::InMemoryAuditLog;
use haulbooks_infra::dispatcher::CommandDispatcher;
use haulbooks_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use haulbooks_infra::projections::{OpenExpense, QueuedShipment, SettlementQueueProjection};
use haulbooks_infra::read_model::InMemoryTenantStore;
use haulbooks_pay::{DeductionPreferences, ExpenseCategory, PayType, PayeeId};
use haulbooks_settlement::{
    Expense, ExpenseCommand, ExpenseId, PaidBy, RecordExpense, SettlementPeriod, build_settlement,
};

type BenchDispatcher = CommandDispatcher<
    InMemoryEventStore,
    InMemoryEventBus<EventEnvelope<serde_json::Value>>,
    InMemoryAuditLog,
>;

fn setup_dispatcher() -> (BenchDispatcher, TenantId, ActorContext) {
    let dispatcher = CommandDispatcher::new(
        InMemoryEventStore::new(),
        InMemoryEventBus::new(),
        InMemoryAuditLog::new(),
    );
    let tenant_id = TenantId::new();
    let actor = ActorContext::new(UserId::new(), Role::Dispatcher);
    (dispatcher, tenant_id, actor)
}

fn create_command(tenant_id: TenantId, shipment_id: ShipmentId) -> ShipmentCommand {
    ShipmentCommand::CreateShipment(CreateShipment {
        tenant_id,
        shipment_id,
        base_rate: Money::from_dollars(2_500),
        miles: 900,
        accessorials: vec![],
        occurred_at: Utc::now(),
    })
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(1000);

    // First command on a fresh stream: no history to replay.
    group.bench_function("create_shipment_fresh", |b| {
        let (dispatcher, tenant_id, actor) = setup_dispatcher();
        b.iter(|| {
            let shipment_id = ShipmentId::new(AggregateId::new());
            dispatcher
                .dispatch(
                    tenant_id,
                    actor,
                    shipment_id.0,
                    &create_command(tenant_id, shipment_id),
                    |id| Shipment::empty(ShipmentId::new(id)),
                )
                .unwrap();
        });
    });

    // Every further command replays the growing stream first.
    group.bench_function("update_financials_with_history", |b| {
        let (dispatcher, tenant_id, actor) = setup_dispatcher();
        let shipment_id = ShipmentId::new(AggregateId::new());
        dispatcher
            .dispatch(
                tenant_id,
                actor,
                shipment_id.0,
                &create_command(tenant_id, shipment_id),
                |id| Shipment::empty(ShipmentId::new(id)),
            )
            .unwrap();

        let mut next_rate = 2_500i64;
        b.iter(|| {
            next_rate += 1;
            let update = ShipmentCommand::UpdateFinancials(UpdateFinancials {
                tenant_id,
                shipment_id,
                base_rate: Some(Money::from_cents(black_box(next_rate * 100))),
                miles: None,
                accessorials: None,
                occurred_at: Utc::now(),
            });
            dispatcher
                .dispatch(tenant_id, actor, shipment_id.0, &update, |id| {
                    Shipment::empty(ShipmentId::new(id))
                })
                .unwrap();
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1usize, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("single_stream_append", batch_size),
            &batch_size,
            |b, &size| {
                let store = InMemoryEventStore::new();
                let tenant_id = TenantId::new();
                let actor_id = UserId::new();
                let shipment_id = ShipmentId::new(AggregateId::new());

                b.iter(|| {
                    let events: Vec<UncommittedEvent> = (0..size)
                        .map(|i| {
                            let event = ShipmentEvent::FinancialsUpdated(FinancialsUpdated {
                                tenant_id,
                                shipment_id,
                                base_rate: Money::from_cents(250_000 + i as i64),
                                miles: 900,
                                accessorials: vec![],
                                occurred_at: Utc::now(),
                            });
                            UncommittedEvent::from_typed(
                                tenant_id,
                                actor_id,
                                shipment_id.0,
                                "shipment",
                                uuid::Uuid::now_v7(),
                                &event,
                            )
                            .unwrap()
                        })
                        .collect();

                    black_box(store.append(events, ExpectedVersion::Any).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Replay a driver's full lifecycle so the aggregates fed into the builder
/// carry real state rather than hand-assembled fields.
fn delivered_shipment(tenant_id: TenantId, payee_id: PayeeId, gross: Money) -> Shipment {
    let shipment_id = ShipmentId::new(AggregateId::new());
    let mut shipment = Shipment::empty(shipment_id);
    let commands = [
        create_command(tenant_id, shipment_id),
        ShipmentCommand::DispatchShipment(DispatchShipment {
            tenant_id,
            shipment_id,
            payee_id,
            dispatcher_id: None,
            occurred_at: Utc::now(),
        }),
        ShipmentCommand::MarkDelivered(MarkDelivered {
            tenant_id,
            shipment_id,
            driver_pay_terms: Some(PayType::FlatRate { amount: gross }),
            dispatcher_pay_terms: None,
            occurred_at: Utc::now(),
        }),
    ];
    for command in &commands {
        let events = shipment.handle(command).unwrap();
        for event in &events {
            shipment.apply(event);
        }
    }
    shipment
}

fn open_expense(tenant_id: TenantId, payee_id: PayeeId, amount: Money) -> Expense {
    let expense_id = ExpenseId::new(AggregateId::new());
    let mut expense = Expense::empty(expense_id);
    let events = expense
        .handle(&ExpenseCommand::RecordExpense(RecordExpense {
            tenant_id,
            expense_id,
            payee_id: Some(payee_id),
            shipment_id: None,
            category: ExpenseCategory::Fuel,
            paid_by: PaidBy::Company,
            amount,
            incurred_at: Utc::now(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
    for event in &events {
        expense.apply(event);
    }
    expense
}

fn bench_settlement_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("settlement_build");

    for shipment_count in [1usize, 10, 50, 200] {
        group.throughput(Throughput::Elements(shipment_count as u64));
        group.bench_with_input(
            BenchmarkId::new("build_settlement", shipment_count),
            &shipment_count,
            |b, &count| {
                let tenant_id = TenantId::new();
                let payee_id = PayeeId::new();
                let shipments: Vec<Shipment> = (0..count)
                    .map(|i| {
                        delivered_shipment(
                            tenant_id,
                            payee_id,
                            Money::from_cents(100_000 + i as i64),
                        )
                    })
                    .collect();
                let expenses: Vec<Expense> = (0..count)
                    .map(|i| open_expense(tenant_id, payee_id, Money::from_cents(5_000 + i as i64)))
                    .collect();
                let period = SettlementPeriod {
                    start: Utc::now() - chrono::Duration::days(14),
                    end: Utc::now() + chrono::Duration::days(1),
                };
                let prefs = DeductionPreferences::all();

                b.iter(|| {
                    black_box(
                        build_settlement(
                            payee_id,
                            period,
                            black_box(&shipments),
                            black_box(&expenses),
                            &prefs,
                        )
                        .unwrap(),
                    );
                });
            },
        );
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for shipment_count in [10usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("settlement_queue_rebuild", shipment_count),
            &shipment_count,
            |b, &count| {
                let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
                    Arc::new(InMemoryEventBus::new());
                let subscription = bus.subscribe();
                let dispatcher = CommandDispatcher::new(
                    InMemoryEventStore::new(),
                    Arc::clone(&bus),
                    InMemoryAuditLog::new(),
                );
                let tenant_id = TenantId::new();
                let actor = ActorContext::new(UserId::new(), Role::Dispatcher);
                let payee_id = PayeeId::new();

                for _ in 0..count {
                    let shipment_id = ShipmentId::new(AggregateId::new());
                    let commands = [
                        create_command(tenant_id, shipment_id),
                        ShipmentCommand::DispatchShipment(DispatchShipment {
                            tenant_id,
                            shipment_id,
                            payee_id,
                            dispatcher_id: None,
                            occurred_at: Utc::now(),
                        }),
                        ShipmentCommand::MarkDelivered(MarkDelivered {
                            tenant_id,
                            shipment_id,
                            driver_pay_terms: Some(PayType::Percentage { percent: 25 }),
                            dispatcher_pay_terms: None,
                            occurred_at: Utc::now(),
                        }),
                    ];
                    for command in &commands {
                        dispatcher
                            .dispatch(tenant_id, actor, shipment_id.0, command, |id| {
                                Shipment::empty(ShipmentId::new(id))
                            })
                            .unwrap();
                    }
                }

                let mut envelopes = Vec::new();
                while let Ok(envelope) = subscription.try_recv() {
                    envelopes.push(envelope);
                }

                let projection: SettlementQueueProjection<
                    Arc<InMemoryTenantStore<ShipmentId, QueuedShipment>>,
                    Arc<InMemoryTenantStore<ExpenseId, OpenExpense>>,
                > = SettlementQueueProjection::new(
                    Arc::new(InMemoryTenantStore::new()),
                    Arc::new(InMemoryTenantStore::new()),
                );

                b.iter(|| {
                    projection
                        .rebuild_from_scratch(black_box(envelopes.clone()))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_settlement_build,
    bench_projection_rebuild_speed
);
criterion_main!(benches);
