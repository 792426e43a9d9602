//! Demo scenarios

use anyhow::Result;
use orgcache::DataAccess;
use orgstore::lazy::{UserDepartment, UserOrders};
use orgstore::{
    Department, DepartmentAssociation, MemoryStore, Order, OrderAssociation, PageRequest,
    PageResult, User, UserAssociation,
};
use serde::Serialize;
use tracing::info;

use crate::Command;

type Access = DataAccess<MemoryStore>;

pub fn run(access: &Access, command: Command) -> Result<()> {
    match command {
        Command::Page {
            page_num,
            page_size,
        } => page(access, page_num, page_size),
        Command::Cache => cache(access),
        Command::Lazy => lazy(access),
        Command::Relations => relations(access),
        Command::All => {
            for page_num in 1..=3 {
                page(access, page_num, 5)?;
            }
            cache(access)?;
            lazy(access)?;
            relations(access)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn user_line(user: &User) -> String {
    format!("{} (ID: {}, {})", user.name, user.id, user.email)
}

/// Store calls issued while `f` runs
fn counting<T>(access: &Access, f: impl FnOnce() -> Result<T>) -> Result<(T, u64)> {
    let before = access.pool().total_calls();
    let value = f()?;
    Ok((value, access.pool().total_calls() - before))
}

pub fn page(access: &Access, page_num: u32, page_size: u32) -> Result<()> {
    println!("\n=== Users, page {} (size {}) ===", page_num, page_size);

    let request = PageRequest::new(page_num, page_size)?;
    let (users, calls): (PageResult<User>, _) = counting(access, || Ok(access.get_page(request)?))?;

    println!(
        "total: {}  pages: {}  has next: {}  has previous: {}  store calls: {}",
        users.total, users.total_pages, users.has_next, users.has_previous, calls
    );
    for user in &users.data {
        print_json(user)?;
    }
    Ok(())
}

pub fn cache(access: &Access) -> Result<()> {
    println!("\n=== Cache tiers ===");

    {
        let mut uow = access.begin()?;
        let (all, calls) = counting(access, || Ok(uow.get_all::<User>()?))?;
        println!("users, first read in unit of work: {} rows, {} store calls", all.len(), calls);

        let (_, calls) = counting(access, || Ok(uow.get_all::<User>()?))?;
        println!("users, second read in same unit of work: {} store calls", calls);

        let (count, calls) = counting(access, || Ok(uow.count::<User>()?))?;
        println!("user count {}: {} store calls", count, calls);

        let (_, calls) = counting(access, || Ok(uow.count::<User>()?))?;
        println!("user count again: {} store calls", calls);
    }

    let (_, calls) = counting(access, || Ok(access.get_all::<User>()?))?;
    println!("users, new unit of work: {} store calls", calls);

    let (user, calls) = counting(access, || Ok(access.get_by_id::<User>(1)?))?;
    println!("user 1, first read: {} store calls", calls);
    let (_, calls) = counting(access, || Ok(access.get_by_id::<User>(1)?))?;
    println!("user 1, second read: {} store calls", calls);

    if let Some(mut user) = user {
        let previous = user.email.clone();
        user.email = format!("{}@corp.example.com", user.name.to_lowercase());
        access.update(&user)?;
        info!(user = user.id, "updated email");

        let (reread, calls) = counting(access, || Ok(access.get_by_id::<User>(user.id)?))?;
        println!(
            "user 1 after update: {} -> {} ({} store calls)",
            previous,
            reread.map(|u| u.email).unwrap_or_default(),
            calls
        );
    }

    print_json(&access.stats())
}

pub fn lazy(access: &Access) -> Result<()> {
    println!("\n=== Lazy relations ===");

    {
        let mut uow = access.begin()?;
        match uow.get_by_id::<User>(1)? {
            Some(user) => {
                println!("user: {}", user_line(&user));

                let (department, calls) = counting(access, || Ok(uow.department_of(&user)?))?;
                println!(
                    "department: {} ({} store calls)",
                    department.map(|d| d.name.as_str()).unwrap_or("none"),
                    calls
                );

                for attempt in 1..=2 {
                    let (orders, calls) = counting(access, || Ok(uow.orders_of(&user)?))?;
                    println!(
                        "orders, access {}: {} orders ({} store calls)",
                        attempt,
                        orders.len(),
                        calls
                    );
                }
            }
            None => println!("user 1 not found"),
        }
    }

    println!("\n--- batched ---");
    let mut uow = access.begin()?;
    let users = uow.get_all::<User>()?;
    let departments = uow.resolve_all::<UserDepartment>(&users)?;
    let orders = uow.resolve_all::<UserOrders>(&users)?;
    println!(
        "{} users: departments in {} store calls, orders in {} store calls",
        users.len(),
        departments.store_calls,
        orders.store_calls
    );

    for user in &users {
        let department = uow.department_of(user)?.map(|d| d.name.as_str()).unwrap_or("none");
        let orders = uow.orders_of(user)?;
        println!("  {}: {}, {} orders", user_line(user), department, orders.len());
    }
    Ok(())
}

pub fn relations(access: &Access) -> Result<()> {
    println!("\n=== Department -> users ===");
    for department in access.get_all_with_association::<Department>(DepartmentAssociation::Users)? {
        println!("{} (ID: {})", department.name, department.id);
        match department.users.get() {
            Some(users) if !users.is_empty() => {
                for user in users {
                    println!("    - {}", user_line(user));
                }
            }
            _ => println!("    no users"),
        }
    }

    println!("\n=== User -> department ===");
    for user in access.get_all_with_association::<User>(UserAssociation::Department)? {
        let department = user.department.get().map(|d| d.name.as_str()).unwrap_or("no department");
        println!("{}: {}", user_line(&user), department);
    }

    println!("\n=== User -> orders ===");
    for user in access.get_all_with_association::<User>(UserAssociation::Orders)? {
        let orders = user.orders.get().map(Vec::as_slice).unwrap_or(&[]);
        if orders.is_empty() {
            continue;
        }
        println!("{}", user_line(&user));
        for order in orders {
            println!("    - {} amount {} (ID: {})", order.order_no, order.amount, order.id);
        }
    }

    println!("\n=== Order -> user ===");
    for order in access.get_all_with_association::<Order>(OrderAssociation::User)? {
        let owner = order.user.get().map(|u| u.name.as_str()).unwrap_or("unknown");
        println!("{} amount {}: {}", order.order_no, order.amount, owner);
    }

    println!("\n=== User 1 with department and orders ===");
    match access.get_with_association::<User>(1, UserAssociation::DepartmentAndOrders)? {
        Some(user) => print_json(&user)?,
        None => println!("user 1 not found"),
    }
    Ok(())
}
