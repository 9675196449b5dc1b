use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use kennelbook::engine::Engine;
use kennelbook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("kennelbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("kennels.wal"), 1000).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "kennelbook".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect_with(addr: SocketAddr, password: &str) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("kennels")
        .user("kennelbook")
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    connect_with(addr, "kennelbook").await.unwrap()
}

async fn query_rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate_of(client: &tokio_postgres::Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.as_db_error()
        .map(|e| e.code().code().to_string())
        .unwrap_or_default()
}

struct World {
    owner: Ulid,
    host: Ulid,
    dog: Ulid,
    kennel: Ulid,
}

/// One host with a large kennel open for January 2025, one owner with a small dog.
async fn seed(client: &tokio_postgres::Client) -> World {
    let w = World {
        owner: Ulid::new(),
        host: Ulid::new(),
        dog: Ulid::new(),
        kennel: Ulid::new(),
    };
    let owner_email = format!("{}@owners.test", w.owner);
    let host_email = format!("{}@hosts.test", w.host);
    client
        .batch_execute(&format!(
            "INSERT INTO owners (id, name, email) VALUES ('{}', 'Olive', '{owner_email}')",
            w.owner
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO owners (id, name, email) VALUES ('{}', 'Hank', '{host_email}')",
            w.host
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO dogs (id, owner_id, name, breed, size) VALUES ('{}', '{}', 'Pip', 'Beagle', 'small')",
            w.dog, w.owner
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO kennels (id, host_id, name, price, size, has_toys) VALUES ('{}', '{}', 'Hilltop', 35.0, 'large', true)",
            w.kennel, w.host
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO availability (id, kennel_id, start_date, days) VALUES ('{}', '{}', '2025-01-01', 31)",
            Ulid::new(),
            w.kennel
        ))
        .await
        .unwrap();
    w
}

fn book_sql(w: &World, booking: Ulid, check_in: &str, check_out: &str) -> String {
    format!(
        "INSERT INTO bookings (id, owner_id, dog_id, kennel_id, check_in, check_out) VALUES ('{booking}', '{}', '{}', '{}', '{check_in}', '{check_out}')",
        w.owner, w.dog, w.kennel
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn connect_and_query() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let host = Ulid::new();

    let rows = query_rows(&client, &format!("SELECT * FROM kennels WHERE host_id = '{host}'")).await;
    assert!(rows.is_empty());
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _engine) = start_test_server().await;
    assert!(connect_with(addr, "not-the-password").await.is_err());
}

#[tokio::test]
async fn search_book_and_list() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = seed(&client).await;

    let available = query_rows(
        &client,
        &format!(
            "SELECT * FROM available_kennels WHERE owner_id = '{}' AND dog_id = '{}' AND check_in = '2025-01-10' AND check_out = '2025-01-13'",
            w.owner, w.dog
        ),
    )
    .await;
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].get("id"), Some(w.kennel.to_string().as_str()));
    assert_eq!(available[0].get("size"), Some("large"));

    let booking = Ulid::new();
    client.batch_execute(&book_sql(&w, booking, "2025-01-10", "2025-01-13")).await.unwrap();

    let mine = query_rows(&client, &format!("SELECT * FROM bookings WHERE owner_id = '{}'", w.owner)).await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("id"), Some(booking.to_string().as_str()));
    assert_eq!(mine[0].get("kennel_name"), Some("Hilltop"));
    assert_eq!(mine[0].get("nights"), Some("3"));
    assert_eq!(mine[0].get("rating"), None);

    let hosted = query_rows(&client, &format!("SELECT * FROM bookings WHERE host_id = '{}'", w.host)).await;
    assert_eq!(hosted.len(), 1);

    let schedule = query_rows(&client, &format!("SELECT * FROM schedule WHERE kennel_id = '{}'", w.kennel)).await;
    let statuses: Vec<_> = schedule
        .iter()
        .map(|r| (r.get("start_date").unwrap(), r.get("end_date").unwrap(), r.get("status").unwrap()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("2025-01-01", "2025-01-10", "free"),
            ("2025-01-10", "2025-01-13", "booked"),
            ("2025-01-13", "2025-02-01", "free"),
        ]
    );

    // The booked nights are gone from search
    let overlapping = query_rows(
        &client,
        &format!(
            "SELECT * FROM available_kennels WHERE owner_id = '{}' AND dog_id = '{}' AND check_in = '2025-01-12' AND check_out = '2025-01-14'",
            w.owner, w.dog
        ),
    )
    .await;
    assert!(overlapping.is_empty());
}

#[tokio::test]
async fn review_shows_on_booking() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = seed(&client).await;

    let booking = Ulid::new();
    client.batch_execute(&book_sql(&w, booking, "2025-01-02", "2025-01-04")).await.unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO reviews (booking_id, owner_id, rating, review) VALUES ('{booking}', '{}', 5, 'Came home happy')",
            w.owner
        ))
        .await
        .unwrap();

    let rows = query_rows(&client, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("rating"), Some("5"));
    assert_eq!(rows[0].get("review"), Some("Came home happy"));
}

#[tokio::test]
async fn lookups_by_owner_and_email() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = seed(&client).await;

    let dogs = query_rows(&client, &format!("SELECT * FROM dogs WHERE owner_id = '{}'", w.owner)).await;
    assert_eq!(dogs.len(), 1);
    assert_eq!(dogs[0].get("breed"), Some("Beagle"));
    assert_eq!(dogs[0].get("unsocial"), Some("f"));

    let email = format!("{}@owners.test", w.owner);
    let owners = query_rows(&client, &format!("SELECT * FROM owners WHERE email = '{email}'")).await;
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].get("id"), Some(w.owner.to_string().as_str()));

    let kennels = query_rows(&client, &format!("SELECT * FROM kennels WHERE host_id = '{}'", w.host)).await;
    assert_eq!(kennels.len(), 1);
    assert_eq!(kennels[0].get("has_toys"), Some("t"));
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = seed(&client).await;

    client
        .batch_execute(&book_sql(&w, Ulid::new(), "2025-01-05", "2025-01-08"))
        .await
        .unwrap();

    // Overlapping stay
    assert_eq!(
        sqlstate_of(&client, &book_sql(&w, Ulid::new(), "2025-01-07", "2025-01-09")).await,
        "23P01"
    );
    // check_out not after check_in
    assert_eq!(
        sqlstate_of(&client, &book_sql(&w, Ulid::new(), "2025-01-20", "2025-01-20")).await,
        "22023"
    );
    // Unknown booking
    assert_eq!(
        sqlstate_of(&client, &format!("SELECT * FROM bookings WHERE id = '{}'", Ulid::new())).await,
        "P0002"
    );
    // Duplicate email
    assert_eq!(
        sqlstate_of(
            &client,
            &format!(
                "INSERT INTO owners (id, name, email) VALUES ('{}', 'Copy', '{}@owners.test')",
                Ulid::new(),
                w.owner
            )
        )
        .await,
        "23P01"
    );
    // Not a statement we understand
    assert_eq!(sqlstate_of(&client, "DELETE FROM bookings").await, "42601");
}

#[tokio::test]
async fn prepared_statements_bind_parameters() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = seed(&client).await;

    let owner = w.owner.to_string();
    let rows = client
        .query("SELECT * FROM dogs WHERE owner_id = $1", &[&owner])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let name: &str = rows[0].get("name");
    assert_eq!(name, "Pip");
}

#[tokio::test]
async fn concurrent_clients_cannot_double_book() {
    let (addr, _engine) = start_test_server().await;
    let setup = connect(addr).await;
    let w = Arc::new(seed(&setup).await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let w = w.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client
                .batch_execute(&book_sql(&w, Ulid::new(), "2025-01-15", "2025-01-18"))
                .await
                .is_ok()
        }));
    }

    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);

    let booked = query_rows(&setup, &format!("SELECT * FROM bookings WHERE owner_id = '{}'", w.owner)).await;
    assert_eq!(booked.len(), 1);
}
