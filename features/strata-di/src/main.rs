use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use strata_di::{
    Container, Context, ContextAdapter, DynError, Factory, Mode, ResolveError, Resolver, Resource,
    Scope, ScopeLevels,
};

#[derive(Debug)]
struct Pool {
    url: Arc<String>,
    checkouts: AtomicUsize,
}

#[derive(Debug)]
struct Transaction {
    id: usize,
}

fn main() -> Result<(), DynError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = Arc::new(ContextAdapter::<String>::from_key(Scope::APP, "database_url").with_id("url"));
    let pool = {
        let url = url.clone();
        Arc::new(
            Resource::new(
                Scope::APP,
                move |container| {
                    Ok::<_, ResolveError>(Pool {
                        url: url.resolve_sync(container)?,
                        checkouts: AtomicUsize::new(0),
                    })
                },
                |pool: Arc<Pool>| {
                    println!("Closing pool to {}", pool.url);
                    Ok(())
                },
            )
            .with_id("pool"),
        )
    };
    let transaction = {
        let pool = pool.clone();
        Resource::new_async(
            Scope::REQUEST,
            move |container| {
                let pool = pool.clone();
                async move {
                    let pool = pool.resolve_async(&container).await?;
                    let id = pool.checkouts.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResolveError>(Transaction { id })
                }
            },
            |transaction: Arc<Transaction>| async move {
                println!("Committing transaction {}", transaction.id);
                Ok(())
            },
        )
        .with_id("transaction")
    };
    let greeting = Factory::new(Scope::REQUEST, |container: &Container| {
        let user = container.context().require::<String>("user")?;
        Ok::<_, ResolveError>(format!("hello {user}"))
    });

    let app = Container::root(
        ScopeLevels::default(),
        Context::new().with("database_url", "postgres://localhost/demo".to_string()),
    );

    let (transaction, greeting) = (&transaction, &greeting);
    futures::executor::block_on(async {
        app.enter(Mode::Async)?;

        for user in ["ada", "grace"] {
            let session = app.spawn_child(Context::new())?;
            let request = {
                session.enter(Mode::Async)?;
                session.spawn_child(Context::new().with("user", user.to_string()))?
            };

            request
                .scoped(|request| async move {
                    let first = transaction.resolve_async(&request).await?;
                    let second = transaction.resolve_async(&request).await?;
                    println!(
                        "{} in transaction {} (same: {})",
                        greeting.resolve_sync(&request)?,
                        first.id,
                        Arc::ptr_eq(&first, &second)
                    );
                    Ok::<_, DynError>(())
                })
                .await?;

            session.exit_async().await?;
        }

        println!("{:?}", app);
        app.exit_async().await?;
        Ok::<_, DynError>(())
    })
}
