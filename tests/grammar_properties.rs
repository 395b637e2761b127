use rtxsync::device::DeviceDialect;
use rtxsync::grammar::{Grammar, Record, Value, catalog};
use rtxsync::templates;

const DEMO_GRAMMAR: &str = r#"{
  "name": "demo",
  "query": ["show config | grep demo"],
  "fields": [
    { "name": "mode", "kind": "text", "set": "demo mode {mode}" },
    { "name": "level", "kind": "integer", "set": "demo mode {mode} {level}" }
  ],
  "patterns": [
    { "regex": "^demo mode (?P<mode>\\S+)" },
    { "regex": "^demo mode (?P<mode>\\S+) (?P<level>\\d+)$" }
  ]
}"#;

/// Lines as the router prints them, long enough to wrap at narrow widths.
const CONFIG_LINES: &[&str] = &[
    "ip route default gateway 192.168.0.1",
    "ip route 10.20.30.0/24 gateway 192.168.100.254 weight 12 hide",
    "nat descriptor type 1000 masquerade",
    "nat descriptor address outer 1000 primary",
    "nat descriptor masquerade static 1000 1 203.0.113.1:80=192.168.100.10:8080 tcp",
    "nat descriptor masquerade static 1000 22 203.0.113.254:65535=192.168.100.200:10443 udp",
    "syslog host 192.168.1.20 1514",
    "syslog facility local0",
    "dns static a printer.example.internal 192.168.100.77",
];

fn dialect() -> DeviceDialect {
    templates::rtx().expect("rtx dialect")
}

/// Breaks lines the way a fixed-width terminal does.
fn wrap_all(lines: &[&str], width: usize) -> Vec<String> {
    lines
        .iter()
        .flat_map(|line| {
            let chars: Vec<char> = line.chars().collect();
            chars
                .chunks(width)
                .map(|chunk| chunk.iter().collect::<String>())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
fn first_matching_pattern_wins() {
    let grammar = Grammar::from_json(DEMO_GRAMMAR).expect("grammar");
    let record = grammar
        .parse(&["demo mode fast 3"])
        .expect("parse")
        .expect("present");

    assert_eq!(record.get("mode"), Some(&Value::from("fast")));
    assert_eq!(record.get("level"), None);
}

#[test]
fn last_matching_line_wins() {
    let grammar = Grammar::from_json(DEMO_GRAMMAR).expect("grammar");
    let record = grammar
        .parse(&["demo mode fast", "demo mode slow"])
        .expect("parse")
        .expect("present");

    assert_eq!(record.get("mode"), Some(&Value::from("slow")));
}

#[test]
fn wrapped_output_reassembles_at_every_width() {
    let dialect = dialect();
    let expected: Vec<String> = CONFIG_LINES.iter().map(|l| l.to_string()).collect();
    let mut checked = 0;

    for width in 40..=120 {
        // A line filling whole rows looks wrapped even when it is not.
        if CONFIG_LINES.iter().any(|l| l.chars().count() % width == 0) {
            continue;
        }
        let physical = wrap_all(CONFIG_LINES, width);
        assert_eq!(
            dialect.reassemble_wrapped(physical, width),
            expected,
            "width {width}"
        );
        checked += 1;
    }
    assert!(checked > 60);
}

#[test]
fn numbers_split_across_rows_are_glued() {
    let dialect = dialect();
    let physical = vec![
        "syslog host 10.0.0.1 15".to_string(),
        "14".to_string(),
        "nat descriptor masquerade static 1 2 203.0.113.1:80".to_string(),
        "=192.168.0.2:80".to_string(),
    ];

    assert_eq!(
        dialect.reassemble_wrapped(physical, 200),
        vec![
            "syslog host 10.0.0.1 1514",
            "nat descriptor masquerade static 1 2 203.0.113.1:80=192.168.0.2:80",
        ]
    );
}

#[test]
fn indented_continuation_keeps_word_boundary() {
    let dialect = dialect();
    let physical = vec![
        "ip route 10.0.0.0/8 gateway 192.168.0.1 weight".to_string(),
        "  2".to_string(),
    ];

    assert_eq!(
        dialect.reassemble_wrapped(physical, 200),
        vec!["ip route 10.0.0.0/8 gateway 192.168.0.1 weight 2"]
    );
}

#[test]
fn unrelated_and_garbled_lines_are_ignored() {
    let grammar = catalog::grammar("syslog").expect("grammar");
    let clean = ["syslog host 192.168.1.10", "syslog notice on"];
    let noisy = [
        "# RTX1210 Rev.14.01.42",
        "",
        "syslog host 192.168.1.10",
        "syslog hos",
        "ip route default gateway 192.168.0.1",
        "syslog debug maybe",
        "syslog notice on",
    ];

    let record = grammar.parse(&noisy).expect("parse");
    assert_eq!(record, grammar.parse(&clean).expect("parse"));

    let record = record.expect("present");
    let hosts = record.list("hosts");
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].get("port"), Some(&Value::Int(514)));
    assert_eq!(record.get("debug"), Some(&Value::Bool(false)));
}

#[test]
fn output_of_another_resource_is_absent() {
    let grammar = catalog::grammar("syslog").expect("grammar");
    let parsed = grammar
        .parse(&["ip route default gateway 192.168.0.1", "dns server 192.168.0.1"])
        .expect("parse");
    assert_eq!(parsed, None);
}

#[test]
fn bound_route_parses_with_derived_fields() -> anyhow::Result<()> {
    let grammar = catalog::grammar("static_route")?
        .bind(&Record::new().with("destination", "172.16.0.0/12"))?;
    let record = grammar
        .parse(&[
            "ip route default gateway 192.168.0.1",
            "ip route 172.16.0.0/12 gateway 10.0.0.1 weight 4 hide",
        ])?
        .ok_or_else(|| anyhow::anyhow!("route missing"))?;

    assert_eq!(record.get("gateway"), Some(&Value::from("10.0.0.1")));
    assert_eq!(record.get("weight"), Some(&Value::Int(4)));
    assert_eq!(record.get("hide"), Some(&Value::Bool(true)));
    assert_eq!(record.get("network"), Some(&Value::from("172.16.0.0")));
    assert_eq!(record.get("prefix_length"), Some(&Value::Int(12)));
    assert_eq!(record.get("netmask"), Some(&Value::from("255.240.0.0")));
    Ok(())
}
