use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const SEASON_START: i64 = 1_704_067_200_000; // 2024-01-01
const MEMBERS: usize = 12;

#[derive(Clone)]
struct Target {
    host: String,
    port: u16,
    password: String,
}

async fn connect(target: &Target, dbname: &str, user_id: Ulid) -> Client {
    let mut config = Config::new();
    config
        .host(&target.host)
        .port(target.port)
        .dbname(dbname)
        .user(user_id.to_string().as_str())
        .password(target.password.as_str());

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_tenant() -> String {
    format!("bench_{}", Ulid::new())
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn paint_sql(start: i64, end: i64, status: &str) -> String {
    format!(r#"INSERT INTO availabilities (start, "end", status) VALUES ({start}, {end}, '{status}')"#)
}

/// A tent with a full roster in `dbname`: the captain's client first.
async fn setup_tent(target: &Target, dbname: &str) -> (Ulid, Vec<Client>) {
    let captain = connect(target, dbname, Ulid::new()).await;
    let tent_id = Ulid::new();
    captain
        .batch_execute(&format!("INSERT INTO tents (id, name) VALUES ('{tent_id}', 'Bench Tent')"))
        .await
        .unwrap();
    let join_code = captain
        .simple_query("SELECT * FROM tents")
        .await
        .unwrap()
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("join_code").map(str::to_string),
            _ => None,
        })
        .expect("tent row");

    let mut clients = vec![captain];
    for _ in 1..MEMBERS {
        let member = connect(target, dbname, Ulid::new()).await;
        member
            .batch_execute(&format!("INSERT INTO memberships (join_code) VALUES ('{join_code}')"))
            .await
            .unwrap();
        clients.push(member);
    }
    (tent_id, clients)
}

async fn phase1_sequential(target: &Target) {
    let client = connect(target, &fresh_tenant(), Ulid::new()).await;
    client
        .batch_execute(&format!("INSERT INTO tents (id, name) VALUES ('{}', 'Solo')", Ulid::new()))
        .await
        .unwrap();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = SEASON_START + (i as i64) * HOUR;
        let t = Instant::now();
        client.batch_execute(&paint_sql(s, s + HOUR, "available")).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} disjoint paints in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_repaint(target: &Target) {
    let client = connect(target, &fresh_tenant(), Ulid::new()).await;
    client
        .batch_execute(&format!("INSERT INTO tents (id, name) VALUES ('{}', 'Repaint')", Ulid::new()))
        .await
        .unwrap();

    // Lay down a grid of one-hour blocks, then repaint it with wide strokes
    // that each swallow several of them.
    for i in 0..500 {
        let s = SEASON_START + (i as i64) * HOUR;
        client.batch_execute(&paint_sql(s, s + HOUR, "maybe")).await.unwrap();
    }

    let n = 1000;
    let statuses = ["available", "maybe", "unavailable"];
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let s = SEASON_START + ((i * 7) % 490) as i64 * HOUR + HOUR / 2;
        let t = Instant::now();
        client
            .batch_execute(&paint_sql(s, s + 6 * HOUR, statuses[i % 3]))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("overlapping repaint latency", &mut latencies);
}

async fn phase3_concurrent(target: &Target) {
    let dbname = fresh_tenant();
    let (_, clients) = setup_tent(target, &dbname).await;
    let n_per_member = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for (m, client) in clients.into_iter().enumerate() {
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_member {
                // Half the strokes overlap the previous one.
                let s = SEASON_START + (j as i64) * HOUR / 2 + (m as i64) * HOUR;
                client
                    .batch_execute(&paint_sql(s, s + HOUR, "available"))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = MEMBERS * n_per_member;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {MEMBERS} members x {n_per_member} paints = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase4_grid_under_load(target: &Target) {
    let dbname = fresh_tenant();
    let (tent_id, mut clients) = setup_tent(target, &dbname).await;

    for (m, client) in clients.iter().enumerate() {
        for i in 0..50 {
            let s = SEASON_START + (i as i64) * 2 * HOUR + (m as i64) * HOUR / 4;
            client.batch_execute(&paint_sql(s, s + HOUR, "available")).await.unwrap();
        }
    }

    // Half the roster keeps painting while the other half reads the grid.
    let stop = Arc::new(AtomicBool::new(false));
    let writers: Vec<Client> = clients.split_off(MEMBERS / 2);
    let mut writer_handles = Vec::new();
    for (w, client) in writers.into_iter().enumerate() {
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = SEASON_START + ((i % 100) + w as i64) * HOUR;
                let _ = client.batch_execute(&paint_sql(s, s + 3 * HOUR, "maybe")).await;
                i += 1;
            }
        }));
    }

    let reads_per_reader = 500;
    let window_end = SEASON_START + 200 * HOUR;
    let mut reader_handles = Vec::new();
    for (r, client) in clients.into_iter().enumerate() {
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let sql = if (i + r) % 2 == 0 {
                    format!(
                        r#"SELECT * FROM availabilities WHERE tent_id = '{tent_id}' AND start >= {SEASON_START} AND "end" <= {window_end}"#
                    )
                } else {
                    format!(
                        r#"SELECT * FROM coverage WHERE tent_id = '{tent_id}' AND start >= {SEASON_START} AND "end" <= {window_end} AND min_count = 3"#
                    )
                };
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("grid + coverage query", &mut all_latencies);
}

async fn phase5_connection_storm(target: &Target) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let target = target.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&target, &fresh_tenant(), Ulid::new()).await;
            client
                .batch_execute(&format!("INSERT INTO tents (id, name) VALUES ('{}', 'Storm')", Ulid::new()))
                .await
                .unwrap();

            for i in 0..ops_per_conn {
                let s = SEASON_START + (i as i64) * HOUR;
                client.batch_execute(&paint_sql(s, s + HOUR, "available")).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let target = Target {
        host: std::env::var("TENTSHIFT_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
        port: std::env::var("TENTSHIFT_PORT")
            .unwrap_or_else(|_| "5433".into())
            .parse()
            .expect("invalid TENTSHIFT_PORT"),
        password: std::env::var("TENTSHIFT_PASSWORD").unwrap_or_else(|_| "tentshift".into()),
    };

    println!("=== tentshift stress benchmark ===");
    println!("target: {}:{}\n", target.host, target.port);

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential paint throughput");
    phase1_sequential(&target).await;

    println!("\n[phase 2] overlapping repaint latency");
    phase2_repaint(&target).await;

    println!("\n[phase 3] concurrent paints in one tent");
    phase3_concurrent(&target).await;

    println!("\n[phase 4] grid read latency under paint load");
    phase4_grid_under_load(&target).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&target).await;

    println!("\n=== benchmark complete ===");
}
