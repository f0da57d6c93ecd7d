use chrono::NaiveDate;
use tracking_reconciler::{
    convert_rows_to_dataset, read_assignment_rows, MemoryStore, ReconcilerConfig, RunSummary,
    TrackingReconciler, TrackingStore,
};

const ASSIGNMENTS: &str = "\
customer_id,customer_name,service_id,service_name,fiscal_start,quarterly_evidence,resource_id,person,status,sequence,period_start,period_end
1,Acme,10,Acme FY25,2025-04-01,false,100,Ana Ruiz,Active,1,2025-04-01,2025-05-31
1,Acme,10,Acme FY25,2025-04-01,false,100,Ana Ruiz,Active,2,2025-07-01,
1,Acme,10,Acme FY25,2025-04-01,false,101,Ben Ode,Dismissed,1,2025-04-01,2025-04-15
2,Globex,20,Globex FY25,2025-01-01,true,200,Cleo Park,Accepted,1,2025-02-10,2025-03-05
2,Globex,20,Globex FY25,2025-01-01,true,200,Cleo Park,Accepted,2,2025-06-01,
";

fn print_summary(summary: &RunSummary) {
    println!("{}", summary.headline());
    for (reason, count) in summary.top_skip_reasons(3) {
        println!("   skipped {:>3} x {:?}", count, reason);
    }
}

fn main() -> anyhow::Result<()> {
    let rows = read_assignment_rows(ASSIGNMENTS.as_bytes())?;
    let store = MemoryStore::from_dataset(convert_rows_to_dataset(&rows)?);

    let today = NaiveDate::from_ymd_opt(2025, 8, 12).unwrap();
    let reconciler = TrackingReconciler::new(&store, ReconcilerConfig::with_reference_date(today))?;

    println!("Reconciling as of {}\n", today);

    print_summary(&reconciler.create_current_period_trackings()?);
    print_summary(&reconciler.backfill_missing_trackings()?);
    print_summary(&reconciler.fix_schedule_labels()?);

    println!("\nStored trackings:");
    for tracking in store.all_trackings()? {
        println!(
            " - #{:<3} resource {} {} period {:>2}/{} [{}] {:?}",
            tracking.id,
            tracking.resource_id,
            tracking.content_type.as_str(),
            tracking.period,
            tracking.year,
            tracking.schedule,
            tracking.status
        );
    }

    println!("\nHistorical groups:");
    for customer in store.list_customers()? {
        let Some(service) = store.find_latest_service_for_customer(customer.id, today)? else {
            continue;
        };
        for coverage in reconciler.coverage_report(&service)? {
            let labels: Vec<&str> = coverage.groups.iter().map(|g| g.label.as_str()).collect();
            println!(" - {} ({}): {}", coverage.person, service.name, labels.join(", "));
        }
    }

    Ok(())
}
