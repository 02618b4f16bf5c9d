use diesel::{QueryResult, insert_into, prelude::*, update};
use kiln_backend_model::db::{
	BoxedSqlConn,
	entity::{PackageRef, SqlPackage},
	schema::{package, package_module},
	types::SqlRepo,
};
use kiln_common_model::package::Repo;
use time::PrimitiveDateTime;

/// A package to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPackage<'a> {
	pub name: &'a str,
	pub is_package: bool,
	pub is_module: bool,
	pub part_of_module: bool,
	pub repo: Option<Repo>,
}

pub async fn create(conn: &mut BoxedSqlConn, new: &NewPackage<'_>) -> QueryResult<PackageRef> {
	conn.get_result(
		insert_into(package::table)
			.values((
				package::name.eq(new.name),
				package::is_package.eq(new.is_package),
				package::is_module.eq(new.is_module),
				package::part_of_module.eq(new.part_of_module),
				package::repo.eq(new.repo.map(SqlRepo::code)),
				package::signed.eq(false),
			))
			.returning(package::id),
	)
	.await
}

/// Records `member` as a component of the module `module`.
pub async fn add_module_member(
	conn: &mut BoxedSqlConn,
	module: PackageRef,
	member: PackageRef,
) -> QueryResult<()> {
	conn.execute(insert_into(package_module::table).values((
		package_module::package_id.eq(member),
		package_module::module_parent_package_id.eq(module),
	)))
	.await?;
	Ok(())
}

pub async fn get(conn: &mut BoxedSqlConn, id: PackageRef) -> QueryResult<SqlPackage> {
	conn.get_result(package::table.find(id)).await
}

/// Members of a module, ordered by ID.
pub async fn module_members(
	conn: &mut BoxedSqlConn,
	module: PackageRef,
) -> QueryResult<Vec<SqlPackage>> {
	let ids: Vec<PackageRef> = conn
		.load(
			package_module::table
				.filter(package_module::module_parent_package_id.eq(module))
				.order(package_module::package_id.asc())
				.select(package_module::package_id),
		)
		.await?;
	let mut members = Vec::with_capacity(ids.len());
	for id in ids {
		members.push(get(conn, id).await?);
	}
	Ok(members)
}

pub async fn set_last_import(
	conn: &mut BoxedSqlConn,
	id: PackageRef,
	time: Option<PrimitiveDateTime>,
) -> QueryResult<()> {
	conn.execute(
		update(package::table.find(id)).set(package::last_import.eq(time)),
	)
	.await?;
	Ok(())
}

pub async fn set_last_build(
	conn: &mut BoxedSqlConn,
	id: PackageRef,
	time: PrimitiveDateTime,
) -> QueryResult<()> {
	conn.execute(
		update(package::table.find(id)).set(package::last_build.eq(Some(time))),
	)
	.await?;
	Ok(())
}

pub async fn mark_signed(conn: &mut BoxedSqlConn, id: PackageRef) -> QueryResult<()> {
	conn.execute(update(package::table.find(id)).set(package::signed.eq(true)))
		.await?;
	Ok(())
}
