use findstore::sarif::parse_sarif;
use std::path::{Path, PathBuf};

#[test]
fn parse_sarif_basic() {
    let sarif = r#"
{
  "version": "2.1.0",
  "runs": [
    {
      "tool": {
        "driver": {
          "name": "demo",
          "rules": [{ "id": "R1" }, { "id": "sprintf-overload" }]
        }
      },
      "results": [
        {
          "ruleId": "R1",
          "level": "error",
          "message": { "text": "Bad thing" },
          "locations": [
            {
              "physicalLocation": {
                "artifactLocation": { "uri": "src/main.c" },
                "region": { "startLine": 3, "startColumn": 5, "endLine": 3, "endColumn": 10 }
              }
            }
          ]
        },
        {
          "ruleIndex": 1,
          "message": { "markdown": "sprintf(char *, const char *, ...)" },
          "locations": [
            {
              "physicalLocation": {
                "artifactLocation": { "uri": "file:///abs/util.c" },
                "region": { "startLine": 7 }
              }
            }
          ]
        }
      ]
    }
  ]
}
"#;
    let findings = parse_sarif(sarif, Path::new("/repo")).unwrap();
    assert_eq!(findings.len(), 2);

    let first = &findings[0];
    assert_eq!(first.path, PathBuf::from("/repo/src/main.c"));
    assert_eq!(first.line, 3);
    assert_eq!(first.column, 5);
    assert_eq!(first.tool, "R1");
    assert_eq!(first.message, "Bad thing");

    let second = &findings[1];
    assert_eq!(second.path, PathBuf::from("/abs/util.c"));
    assert_eq!(second.line, 7);
    assert_eq!(second.column, 1);
    assert_eq!(second.tool, "sprintf-overload");
    assert_eq!(second.message, "sprintf(char *, const char *, ...)");
}

#[test]
fn parse_sarif_skips_unlocated_results() {
    let sarif = r#"
{
  "runs": [
    {
      "tool": { "driver": { "name": "lint" } },
      "results": [
        { "message": { "text": "no location" } },
        {
          "message": { "text": "" },
          "locations": [{ "physicalLocation": { "artifactLocation": { "uri": "a.c" } } }]
        },
        {
          "message": { "text": "whole file" },
          "locations": [{ "physicalLocation": { "artifactLocation": { "uri": "b.c" } } }]
        }
      ]
    }
  ]
}
"#;
    let findings = parse_sarif(sarif, Path::new("/repo")).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].path, PathBuf::from("/repo/b.c"));
    assert_eq!(findings[0].tool, "lint");
    assert_eq!((findings[0].line, findings[0].column), (0, 0));
}

#[test]
fn parse_sarif_rejects_invalid_json() {
    assert!(parse_sarif("{ not json", Path::new("/repo")).is_err());
    assert!(parse_sarif("{}", Path::new("/repo")).unwrap().is_empty());
}
