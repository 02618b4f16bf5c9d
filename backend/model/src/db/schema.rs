diesel::table! {
	/// Packages and modules known to the distribution.
	package (id) {
		id -> BigInt,
		name -> Varchar,
		/// Whether the package has an RPM source.
		is_package -> Bool,
		/// Whether the package has a module source.
		is_module -> Bool,
		/// Whether the package is a member of some module.
		part_of_module -> Bool,
		/// Repository, see `SqlRepo`.
		repo -> Nullable<Int2>,
		/// Set once a module build of this package has been signed.
		signed -> Bool,
		/// Time of the last successful import.
		///
		/// Cleared when an import fails.
		last_import -> Nullable<Timestamp>,
		/// Time of the last successful build.
		last_build -> Nullable<Timestamp>,
		created_at -> Timestamp,
	}
}

diesel::table! {
	/// Membership of packages in modules.
	package_module (id) {
		id -> BigInt,
		/// The member package.
		package_id -> BigInt,
		/// The module package.
		module_parent_package_id -> BigInt,
	}
}

diesel::table! {
	import (id) {
		id -> BigInt,
		package_id -> BigInt,
		/// See `SqlImportStatus`.
		status -> Int2,
		/// Whether the module source is imported instead of the RPM source.
		module -> Bool,
		/// Distribution major version to import.
		version -> Int4,
		single_tag -> Nullable<Varchar>,
		executor_username -> Varchar,
		created_at -> Timestamp,
	}
}

diesel::table! {
	/// Branch heads produced by a successful import.
	import_commit (id) {
		id -> BigInt,
		import_id -> BigInt,
		branch -> Varchar,
		commit_hash -> Varchar,
	}
}

diesel::table! {
	build (id) {
		id -> BigInt,
		package_id -> BigInt,
		import_commit_id -> BigInt,
		/// See `SqlBuildStatus`.
		status -> Int2,
		/// Whether the build is dispatched to the module build service.
		mbs -> Bool,
		scratch -> Bool,
		scratch_merged -> Bool,
		/// Target tag overriding the base tag.
		force_tag -> Nullable<Varchar>,
		arch_override -> Nullable<Varchar>,
		/// Build hub task ID, set when submitted to the hub.
		koji_id -> Nullable<BigInt>,
		/// Module build ID, set when submitted to the module build service.
		mbs_id -> Nullable<BigInt>,
		signed -> Bool,
		executor_username -> Varchar,
		created_at -> Timestamp,
	}
}

diesel::table! {
	batch_import (id) {
		id -> BigInt,
		created_at -> Timestamp,
	}
}

diesel::table! {
	batch_import_item (id) {
		id -> BigInt,
		batch_import_id -> BigInt,
		import_id -> BigInt,
	}
}

diesel::table! {
	batch_build (id) {
		id -> BigInt,
		created_at -> Timestamp,
	}
}

diesel::table! {
	batch_build_item (id) {
		id -> BigInt,
		batch_build_id -> BigInt,
		build_id -> BigInt,
	}
}

diesel::table! {
	job_queue (id) {
		/// Unique identifier of this job.
		///
		/// IDs are increasing in enqueue order.
		id -> BigInt,
		kind -> Varchar,
		/// JSON payload of the job command.
		data -> Text,
		priority -> Int2,
		/// Count of failed executions of this job.
		attempts -> Int2,
		/// Started time of this job.
		///
		/// This column is null when and only when the job is not started.
		started_at -> Nullable<Timestamp>
	}
}
