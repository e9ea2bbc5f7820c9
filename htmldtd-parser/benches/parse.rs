use criterion::{criterion_group, criterion_main, Criterion};
use htmldtd_model::html;
use htmldtd_parser::{EventCollector, Parser, StrSource};
use std::fmt::Write;

fn document(paragraphs: usize) -> String {
    let mut doc = String::from("<html><head><title>bench</title></head><body>");
    for i in 0..paragraphs {
        write!(
            doc,
            "<p>paragraph {i} with <b>bold</b>, <i>italic</i> and &amp; entities</p>"
        )
        .unwrap();
    }
    doc.push_str("<table>");
    for r in 0..20 {
        write!(doc, "<tr><td>cell {r}</td><td>more</td></tr>").unwrap();
    }
    doc.push_str("</table></body></html>");
    doc
}

fn bench_parse(c: &mut Criterion) {
    let doc = document(200);
    let dtd = html::dtd();
    c.bench_function("parse_document", |b| {
        b.iter(|| {
            let mut parser = Parser::new(dtd.clone(), EventCollector::new());
            let mut src = StrSource::new(&doc);
            parser.parse(&mut src).unwrap();
            parser.into_sink().events.len()
        })
    });

    let sloppy = "<table><td>a<td>b<tr><td>c</table><p>one<p>two<p>three".repeat(50);
    c.bench_function("parse_with_recovery", |b| {
        b.iter(|| {
            let mut parser = Parser::new(dtd.clone(), EventCollector::new());
            let mut src = StrSource::new(&sloppy);
            parser.parse(&mut src).unwrap();
            parser.into_sink().events.len()
        })
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
