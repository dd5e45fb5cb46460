// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use pretty_assertions::assert_eq;

use super::*;

const OBJDUMP: &str = "
0000000000401000 <_start>:
  401000:\t48 31 ed             \txor    %rbp,%rbp
  401003:\teb 02                \tjmp    401007 <done>
  401005:\t0f 0b                \tud2

0000000000401007 <done>:
  401007:\t0f 05                \tsyscall
";

fn coverage(hits: &[(u64, u64)]) -> BinaryCoverage {
    let mut coverage = BinaryCoverage::default();

    for (addr, count) in hits {
        coverage.hits.insert(Address(*addr), Count(*count));
    }

    coverage
}

#[test]
fn test_report_lines() -> Result<()> {
    let listing = Listing::parse(OBJDUMP)?;
    let report = Report::new(&listing, &coverage(&[(0x401000, 2), (0x401003, 2)]));

    assert_eq!(
        report.lines()[..3],
        [
            ReportLine::Label {
                address: Address(0x401000),
                name: "_start".into(),
            },
            ReportLine::Instruction {
                address: Address(0x401000),
                code: "xor    %rbp,%rbp".into(),
                hits: Count(2),
            },
            ReportLine::Instruction {
                address: Address(0x401003),
                code: "jmp    401007 <done>".into(),
                hits: Count(2),
            },
        ]
    );

    assert_eq!(
        report.uncovered().collect::<Vec<_>>(),
        vec![Address(0x401005), Address(0x401007)]
    );

    Ok(())
}

#[test]
fn test_summary() -> Result<()> {
    let listing = Listing::parse(OBJDUMP)?;
    let report = Report::new(
        &listing,
        &coverage(&[(0x401000, 1), (0x401007, 1), (0x7f00_0000_1000, 3)]),
    );

    let summary = report.summary();
    assert_eq!(
        summary,
        Summary {
            instructions: 4,
            covered: 2,
            unlisted: 1,
        }
    );
    assert_eq!(summary.percent(), 50.0);
    assert_eq!(
        report.unlisted().collect::<Vec<_>>(),
        vec![Address(0x7f00_0000_1000)]
    );

    Ok(())
}

#[test]
fn test_empty_listing() {
    let report = Report::new(&Listing::default(), &BinaryCoverage::default());

    assert_eq!(report.summary().instructions, 0);
    assert_eq!(report.summary().percent(), 0.0);
}

#[test]
fn test_display() -> Result<()> {
    let listing = Listing::parse(OBJDUMP)?;
    let report = Report::new(&listing, &coverage(&[(0x401000, 1), (0x401003, 1), (0x401007, 1)]));

    let text = report.to_string();
    let expected = "
_start:
[✔]   401000:  xor    %rbp,%rbp ; hits=1
[✔]   401003:  jmp    401007 <done> ; hits=1
[ ]   401005:  ud2 ; hits=0

done:
[✔]   401007:  syscall ; hits=1

covered 3/4 instructions (75.0%)
";

    assert_eq!(text, expected);

    Ok(())
}
