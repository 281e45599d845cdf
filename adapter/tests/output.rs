// Debuggee output forwarding

use kotlin_debug_adapter::client::DapClient;
use kotlin_debug_adapter::lanes::Lane;
use kotlin_debug_adapter::protocol::Outgoing;
use kotlin_debug_adapter::session::forward_output;
use tokio::io::{duplex, AsyncWriteExt};

#[tokio::test]
async fn test_stdout_lines_arrive_in_order_despite_stderr() {
    let (client, mut rx) = DapClient::channel();
    let (mut stdout_writer, stdout_reader) = duplex(256);
    let (mut stderr_writer, stderr_reader) = duplex(256);

    Lane::spawn("stdout").execute(forward_output(stdout_reader, client.clone(), "stdout"));
    Lane::spawn("stderr").execute(forward_output(stderr_reader, client, "stderr"));

    const LINES: usize = 200;
    let writer = tokio::spawn(async move {
        for i in 0..LINES {
            stdout_writer.write_all(format!("line {}\n", i).as_bytes()).await.unwrap();
            if i % 3 == 0 {
                stderr_writer.write_all(format!("warning {}\n", i).as_bytes()).await.unwrap();
            }
        }
        // Dropping both writers ends the forwarders
    });
    writer.await.unwrap();

    let mut stdout = Vec::new();
    let mut stderr = 0;
    while stdout.len() < LINES || stderr < LINES.div_ceil(3) {
        match rx.recv().await.unwrap() {
            Outgoing::Event(event) => {
                assert_eq!(event.event, "output");
                let body = event.body.unwrap();
                match body["category"].as_str().unwrap() {
                    "stdout" => stdout.push(body["output"].as_str().unwrap().to_string()),
                    "stderr" => stderr += 1,
                    other => panic!("unexpected category {}", other),
                }
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    let expected: Vec<String> = (0..LINES).map(|i| format!("line {}\n", i)).collect();
    assert_eq!(stdout, expected);
}

#[tokio::test]
async fn test_unterminated_last_line_is_forwarded() {
    let (client, mut rx) = DapClient::channel();
    let (mut writer, reader) = duplex(64);

    writer.write_all(b"first\nlast").await.unwrap();
    drop(writer);
    forward_output(reader, client, "stdout").await;

    let mut outputs = Vec::new();
    while let Ok(Outgoing::Event(event)) = rx.try_recv() {
        outputs.push(event.body.unwrap()["output"].as_str().unwrap().to_string());
    }
    assert_eq!(outputs, vec!["first\n", "last\n"]);
}
