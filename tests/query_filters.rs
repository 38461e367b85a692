use mailindex::search::{DateFilter, combine_filters, folder_filter, translate_filter};

#[test]
fn date_operators_combine_with_folder() {
    let date = translate_filter("after=2020-01-02 AND before=2020-02-02");
    let filter = combine_filters([date, folder_filter("Inbox/Work")]);
    assert_eq!(
        filter.as_deref(),
        Some(r#"(date>1577923200 AND date<1580601600) AND (folder = "Inbox/Work")"#)
    );
}

#[test]
fn range_bounds_are_exposed() {
    let filter = DateFilter::parse(r#"time="2020-01:2020-02" AND from = "ada""#);
    assert_eq!(filter.query, r#"date>1577836800 AND date<1580515200 AND from = "ada""#);
    assert!(filter.after < filter.before);
}

#[test]
fn empty_query_has_no_filter() {
    assert_eq!(combine_filters([translate_filter("")]), None);
}
