use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, Local, NaiveDate};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: &str, user: &str, password: &str) -> Self {
        let socket = TcpStream::connect(addr).await.expect("failed to connect");
        let mut client = Self { framed: Framed::new(socket, LinesCodec::new()) };
        let resp = client.call(json!({"op": "login", "user": user, "password": password})).await;
        assert_eq!(resp["ok"], true, "login failed: {resp}");
        client
    }

    async fn call(&mut self, request: Value) -> Value {
        self.framed.send(request.to_string()).await.expect("send failed");
        let line = self.framed.next().await.expect("connection closed").expect("read failed");
        serde_json::from_str(&line).expect("bad response")
    }
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

struct Target {
    addr: String,
    password: String,
    admin: String,
    room: String,
    /// First date of a window no earlier run has touched.
    base: NaiveDate,
}

impl Target {
    fn day(&self, offset: u64) -> String {
        (self.base + Days::new(offset)).to_string()
    }

    async fn employee(&self, user: &str) -> Client {
        Client::connect(&self.addr, user, &self.password).await
    }

    async fn admin(&self) -> Client {
        Client::connect(&self.addr, &self.admin, &self.password).await
    }
}

fn booking(room: &str, date: &str, category: &str, start: &str, end: &str) -> Value {
    json!({
        "op": "create_reservation",
        "reservation": {
            "resource_id": room,
            "date": date,
            "start_time": start,
            "end_time": end,
            "category": category,
            "purpose": "stress",
        }
    })
}

async fn phase1_sequential(target: &Target) {
    let mut client = target.employee("bench-seq").await;
    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let date = target.day(i / 10);
        let hour = 9 + i % 10;
        let req = booking(&target.room, &date, "internal", &format!("{hour}:00"), &format!("{hour}:45"));
        let t = Instant::now();
        let resp = client.call(req).await;
        latencies.push(t.elapsed());
        assert_eq!(resp["ok"], true, "create failed: {resp}");
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contention(target: Arc<Target>) {
    let n_tasks = 20;
    let date = target.day(400);

    // Every requester asks for an overlapping slot on one day.
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let target = target.clone();
        let date = date.clone();
        handles.push(tokio::spawn(async move {
            let mut client = target.employee(&format!("bench-rival-{i}")).await;
            let start = format!("{}:{:02}", 10 + i / 4, (i % 4) * 15);
            let resp = client.call(booking(&target.room, &date, "external", &start, "15:00")).await;
            resp["data"]["id"].as_str().map(String::from)
        }));
    }
    let mut pending = Vec::new();
    for h in handles {
        if let Some(id) = h.await.unwrap() {
            pending.push(id);
        }
    }

    // Several admins approve all of them at once; only one may win.
    let start = Instant::now();
    let approved = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for chunk in pending.chunks(5).map(<[String]>::to_vec) {
        let target = target.clone();
        let approved = approved.clone();
        handles.push(tokio::spawn(async move {
            let mut admin = target.admin().await;
            for id in chunk {
                let resp = admin.call(json!({"op": "approve_reservation", "id": id})).await;
                if resp["ok"] == true {
                    approved.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let mut admin = target.admin().await;
    let listed = admin
        .call(json!({"op": "list_reservations", "filter": {"date": date, "status": "approved"}}))
        .await;
    let approved_now = listed["data"].as_array().map_or(0, Vec::len);
    println!(
        "  {} contenders, {} approvals succeeded, {approved_now} approved on the day, in {:.2}s",
        pending.len(),
        approved.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64()
    );
    assert_eq!(approved_now, 1, "overlapping approvals were admitted");
}

async fn phase3_connection_storm(target: Arc<Target>) {
    let n_conns = 50u64;
    let ops_per_conn = 10u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let target = target.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let mut client = target.employee(&format!("bench-storm-{c}")).await;
            let date = target.day(500 + c);
            for i in 0..ops_per_conn {
                let hour = 9 + i;
                let resp = client
                    .call(booking(&target.room, &date, "internal", &format!("{hour}:00"), &format!("{hour}:30")))
                    .await;
                assert_eq!(resp["ok"], true, "create failed: {resp}");
                client.call(json!({"op": "notifications"})).await;
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
    let env = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.into());
    let host = env("SLOTKEEPER_HOST", "127.0.0.1");
    let port = env("SLOTKEEPER_PORT", "5480");
    let password = env("SLOTKEEPER_PASSWORD", "slotkeeper");
    let admin = env("SLOTKEEPER_BENCH_ADMIN", "admin");
    let addr = format!("{host}:{port}");

    println!("=== slotkeeper stress benchmark ===");
    println!("target: {addr}\n");

    println!("[setup]");
    let mut probe = Client::connect(&addr, &admin, &password).await;
    let rooms = probe.call(json!({"op": "list_resources"})).await;
    let room = rooms["data"]
        .as_array()
        .and_then(|rooms| rooms.iter().max_by_key(|r| r["max_duration"].as_u64()))
        .and_then(|r| r["id"].as_str())
        .expect("server has no rooms")
        .to_string();
    drop(probe);

    // Spread runs across years so reruns against the same WAL do not collide.
    let offset = (chrono::Utc::now().timestamp() as u64 % 100) * 1000;
    let base = Local::now().date_naive() + Days::new(30 + offset);
    println!("  room {room}, dates from {base}");
    let target = Arc::new(Target { addr, password, admin, room, base });

    println!("\n[phase 1] sequential write throughput");
    phase1_sequential(&target).await;

    println!("\n[phase 2] approval contention on one slot");
    phase2_contention(target.clone()).await;

    println!("\n[phase 3] connection storm");
    phase3_connection_storm(target).await;

    println!("\n=== benchmark complete ===");
}
