//! Generate a sample report for validation testing
//!
//! Simulates a morning of Slack/Xcode ping-pong followed by a YouTube habit
//! and prints the resulting report plus every generated script.

fn main() {
    let mut rows = Vec::new();
    let mut t = 700_000_000_i64;

    // Xcode <-> Slack: 8s in each, 2s lost per switch
    for i in 0..300 {
        let app = if i % 2 == 0 { "com.apple.dt.Xcode" } else { "com.tinyspeck.slackmacgap" };
        rows.push(serde_json::json!({ "start": t, "end": t + 8, "app": app, "stream": "/app/usage" }));
        t += 10;
    }

    // Safari <-> YouTube: 20s in each, 4s lost per switch
    for i in 0..200 {
        let app = if i % 2 == 0 { "com.apple.Safari" } else { "com.google.ios.youtube" };
        rows.push(serde_json::json!({ "start": t, "end": t + 20, "app": app, "stream": "/app/usage" }));
        t += 24;
    }

    let rows_json = serde_json::Value::Array(rows).to_string();
    let config = loopwatch::EngineConfig::default();

    let engine = match loopwatch::DeathLoopEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {e:?}");
            return;
        }
    };

    let rows = match loopwatch::UsageRowAdapter::parse_array(&rows_json) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error: {e:?}");
            return;
        }
    };

    let analysis = engine.analyze(&rows);
    print!("{}", engine.report(&analysis).to_text());

    for script in &analysis.scripts {
        println!("\n==> {} <==", script.file_name);
        print!("{}", script.rendered_source);
    }
}
