use criterion::{Criterion, criterion_group, criterion_main};
use lobster_ledger::{InMemoryLedgerStore, LedgerStore};
use lobster_types::OpToken;
use uuid::Uuid;

fn bench_freeze_refund(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryLedgerStore::new();
    let account = Uuid::new_v4();
    rt.block_on(store.top_up(account, 1_000_000, OpToken::top_up(Uuid::new_v4())))
        .unwrap();

    c.bench_function("freeze_refund_single_wallet", |b| {
        b.iter(|| {
            rt.block_on(async {
                let task = Uuid::new_v4();
                store.freeze(account, 10, OpToken::freeze(task)).await.unwrap();
                store.refund(account, 10, OpToken::refund(task)).await.unwrap();
            })
        })
    });

    c.bench_function("freeze_across_64_wallets", |b| {
        let accounts: Vec<Uuid> = (0..64).map(|_| Uuid::new_v4()).collect();
        for account in &accounts {
            rt.block_on(store.top_up(*account, u64::MAX / 2, OpToken::top_up(Uuid::new_v4())))
                .unwrap();
        }
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::with_capacity(accounts.len());
                for account in &accounts {
                    let store = store.clone();
                    let account = *account;
                    handles.push(tokio::spawn(async move {
                        store
                            .freeze(account, 1, OpToken::freeze(Uuid::new_v4()))
                            .await
                    }));
                }
                for handle in handles {
                    handle.await.unwrap().unwrap();
                }
            })
        })
    });
}

criterion_group!(benches, bench_freeze_refund);
criterion_main!(benches);
